pub mod fasta;
pub mod header;
pub mod variants;
