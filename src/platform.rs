//! Capability seams toward the host platform
//!
//! The engine never talks to a concrete platform API. Opening/sharing a
//! downloaded file, sounding an alert and navigation on auth failures are
//! injected through these traits; tests substitute recording stubs.

use crate::error::Result;
use std::path::Path;
use tracing::info;

/// Hand finished work to the platform: share a local file, or get the
/// user's attention for an arrived message.
pub trait PlatformDelivery {
    /// Offer the downloaded file to the platform's open/share facility
    fn share(&self, path: &Path, mime: &str) -> Result<()>;

    /// Sound + haptic for a newly arrived counterpart message
    fn alert(&self);
}

/// Navigation side effects for auth conditions discovered mid-conversation
pub trait SessionRouter {
    /// The session token is unusable; the user must sign in again
    fn force_sign_in(&self);

    /// The account is not yet cleared to chat; show the waiting screen
    fn show_awaiting_access(&self);
}

/// Terminal-backed delivery for the CLI: sharing prints the local path,
/// alerting rings the terminal bell.
pub struct TerminalDelivery;

impl PlatformDelivery for TerminalDelivery {
    fn share(&self, path: &Path, mime: &str) -> Result<()> {
        println!("saved {} ({})", path.display(), mime);
        Ok(())
    }

    fn alert(&self) {
        print!("\x07");
        info!("new message from the clinic");
    }
}

pub struct TerminalRouter;

impl SessionRouter for TerminalRouter {
    fn force_sign_in(&self) {
        info!("session expired, sign in again");
    }

    fn show_awaiting_access(&self) {
        info!("chat is awaiting clinic approval");
    }
}
