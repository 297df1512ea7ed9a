//! Query planning and execution.
//!
//! The planner compiles a query into an ordered, coalesced list of byte
//! slices; the executor streams those slices through the record store
//! under a byte budget, producing pages and resumable cursors.

mod exec;
mod plan;

pub use exec::{fetch_page, Page, QueryCursor};
pub use plan::{plan_all, plan_query, QueryPlan, RecordFilter, Slice};
