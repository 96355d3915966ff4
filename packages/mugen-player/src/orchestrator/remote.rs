//! Remote-control commands sent by in-player scripts.
//!
//! Scripts send `script-message` payloads such as `["seek", "42"]`; the
//! player reports them as client messages.

/// A parsed remote-control command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Skip,
    GoBack,
    /// Seek to an absolute position in seconds.
    Seek(f64),
    TogglePause,
    ToggleSubs,
}

impl RemoteCommand {
    /// Parses client-message arguments. Returns `None` for anything else.
    #[must_use]
    pub fn parse(args: &[String]) -> Option<Self> {
        let (command, params) = args.split_first()?;
        match command.as_str() {
            "skip" => Some(Self::Skip),
            "go-back" => Some(Self::GoBack),
            "seek" => params
                .first()
                .and_then(|p| p.trim().parse::<f64>().ok())
                .filter(|t| t.is_finite())
                .map(|t| Self::Seek(t.max(0.0))),
            "pause" => Some(Self::TogglePause),
            "subs" => Some(Self::ToggleSubs),
            _ => None,
        }
    }
}
