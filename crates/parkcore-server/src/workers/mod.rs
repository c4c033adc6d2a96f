pub mod cross_instance_poller;
pub mod expiry_bridge;
pub mod fallback_sweep;
pub mod lease_audit_sweep;
pub mod pending_sweep;
