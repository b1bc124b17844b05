//! # peptide-fm
//!
//! 面向质谱肽段鉴定的蛋白质 FM 索引。
//!
//! 本 crate 把蛋白质数据库压缩为若干自包含分片，并支持：
//!
//! - **精确 / 模糊匹配**：肽段到蛋白位置的映射，支持 B/Z/J/X 通配与 I/L 等价
//! - **质量标签**：`[质量]序列[质量]` 形式的从头测序标签，质量缺口由残基组合填充
//! - **修饰**：固定、可变以及蛋白 / 肽段末端修饰
//! - **变异**：通用编辑预算、按类型分别计数、或仅允许索引中登记的固定变异
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use peptide_fm::config::{IndexParams, MatchingRules};
//! use peptide_fm::index::fm::FMIndex;
//! use peptide_fm::search::tag::Tag;
//!
//! let params = IndexParams::default();
//! let index = FMIndex::open("proteins.fasta".as_ref(), &params, None)?;
//!
//! let rules = MatchingRules::default();
//! for m in index.get_protein_mapping("STAVPK", &rules) {
//!     println!("{m}");
//! }
//!
//! let tag = Tag::parse("[200.1]AVP[128.1]", &rules)?;
//! println!("{} hits", index.get_tag_mapping(&tag, &rules).len());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## 模块说明
//!
//! - [`io`] — FASTA 与固定变异表解析、FASTA 头元数据
//! - [`index`] — 后缀数组、BWT、小波树、分片与 FM 索引外观
//! - [`search`] — 回溯搜索引擎、质量表、修饰与标签
//! - [`config`] — 匹配规则与索引构建参数
//! - [`util`] — 氨基酸字母表与质量容差

pub mod config;
pub mod error;
pub mod index;
pub mod io;
pub mod search;
pub mod util;
