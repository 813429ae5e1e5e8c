//! Plug-based dataflow engine for Plugflow.
//!
//! Processes expose typed plugs, a workflow connects them and evaluates
//! output plugs on demand in query, make or dirty-check mode while recording
//! a call graph. The QA layer runs batches of checks on top of it.

pub mod attribute;
pub mod callgraph;
pub mod config;
pub mod description;
pub mod errors;
pub mod events;
pub mod mode;
pub mod nested;
pub mod plug;
pub mod process;
pub mod processes;
pub mod qa;
pub mod qa_external;
pub mod registry;
pub mod report;
pub mod shell;
pub mod value;
pub mod wiring;
pub mod workflow;

pub use attribute::*;
pub use callgraph::*;
pub use config::*;
pub use description::*;
pub use errors::*;
pub use events::*;
pub use mode::*;
pub use nested::*;
pub use plug::*;
pub use process::*;
pub use processes::*;
pub use qa::*;
pub use qa_external::*;
pub use registry::*;
pub use report::*;
pub use shell::*;
pub use value::*;
pub use wiring::*;
pub use workflow::*;
