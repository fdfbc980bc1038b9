pub mod auth;
pub mod budget;
pub mod calendar;
pub mod pagination;
pub mod pipeline;
pub mod poller;
pub mod report;
pub mod sink;
pub mod summary;
pub mod ticket;

pub use auth::{Token, TokenManager};
pub use pipeline::Pipeline;
pub use report::{ReportFilter, ReportKind, ReportRequest};
pub use summary::{RunStatus, RunSummary};
pub use ticket::{Ticket, TicketRequester};
