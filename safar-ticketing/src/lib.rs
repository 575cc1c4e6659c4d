pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod pricing;
pub mod voucher;

pub use lifecycle::{
    ExecuteOutcome, IssueRequest, PaymentReceipt, TicketAction, TicketChanges, TicketService,
    UsageStatus,
};
pub use policy::PolicyDecision;
pub use voucher::VoucherMeta;
