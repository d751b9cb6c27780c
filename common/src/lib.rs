pub mod args;
pub mod cors;
pub mod db;
pub mod metrics;
pub mod redis;
pub mod shutdown;

use owo_colors::OwoColorize;

/// Process-wide startup hook: prints a banner. Mirrors the zero-argument
/// `strim_common::init()` call this codebase's binaries make before doing
/// anything else.
pub fn init() {
    println!("{}", "🚀 runforge starting up".green().bold());
}

/// Signals external orchestration (e.g. a readiness probe) that this
/// process has finished its startup sequence and is ready to serve.
pub fn signal_ready() {
    println!("{}", "✅ ready".green());
}
