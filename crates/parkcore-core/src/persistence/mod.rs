pub mod booking_repo;
pub mod idempotency_repo;
pub mod lease_audit_repo;
pub mod pending_booking_repo;

pub use booking_repo::BookingRepo;
pub use idempotency_repo::IdempotencyRepo;
pub use lease_audit_repo::LeaseAuditRepo;
pub use pending_booking_repo::PendingBookingRepo;
