pub mod models;

pub use models::{
    ActivityLog, Applicant, ApplicantStatus, CancellationPolicy, PolicyCategory, PolicyCondition,
    Ticket, TicketStatus, Transaction, TransactionType, TransportRoute, TripType, Voucher,
};
