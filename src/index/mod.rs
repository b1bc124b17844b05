pub mod bwt;
pub mod fm;
pub mod rank;
pub mod sa;
pub mod shard;
pub mod variant;
pub mod wavelet;
