//! Intelligent capture filter: an explicit, ordered rule chain that gives
//! every discovered capture a status and an auditable reason.

pub mod filter;
pub mod priority;
pub mod rules;

pub use filter::{
    CaptureFilter, Classification, FilterConfig, FilterVerdict, NoPageLookup, PageLookup,
    ProcessedPage,
};
pub use priority::priority_score;
pub use rules::{CustomRule, ListPageRule, EXCLUDED_EXTENSIONS};
