//! Scraping logic, written against [`PageDriver`](crate::browser::PageDriver)
//! so it runs the same over a real browser session or a scripted page.

pub mod extractor;
pub mod navigator;
pub mod queries;

#[cfg(test)]
pub(crate) mod testing;

pub use queries::{parse_percent, MoneyPuck};
