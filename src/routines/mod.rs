// Glucose interval categorization
pub mod categorize;
// Insulin action curves
pub mod insulin;
// Insulin-on-board reconstruction
pub mod iob;
// Per-day progress, reports and the audit record
pub mod output;
// Run settings
pub mod settings;
// The per-day tuning fold
pub mod tune;
