use crate::model::LockCodeStatus;

pub const NOTE_IN_USE: &str = "Leaving lock code as it's in use.";
pub const NOTE_PRESENT: &str = "Lock code present.";
pub const NOTE_REMOVING: &str = "Attempting to remove lock code.";
pub const NOTE_ADDING: &str = "Attempting to add lock code.";
pub const NOTE_REMOVED: &str = "Code was removed.";
pub const NOTE_SHARED: &str = "Code is currently in use; nothing more to do.";
pub const NOTE_ABSENT: &str = "Code is not on the lock; nothing to remove.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Remove,
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::Add => "add",
            Command::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: LockCodeStatus,
    pub note: &'static str,
}

const fn to(to: LockCodeStatus, note: &'static str) -> Option<Transition> {
    Some(Transition { to, note })
}

/// What to do about one code value on one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub command: Option<Command>,
    /// One slot per entry of `adds`, in the same order. `None` leaves the entry alone.
    pub adds: Vec<Option<Transition>>,
    /// One slot per entry of `removes`, in the same order.
    pub removes: Vec<Option<Transition>>,
}

/// Decide the controller command and status changes for every started code
/// sharing one value.
///
/// `exists` is whether the lock reports the code, `adds` the statuses of the
/// entries that want the code present right now and `removes` the statuses of
/// those whose window is over. When both sides ask, presence wins.
///
/// Returns the reason when the state has no defined resolution.
pub fn decide(
    exists: bool,
    adds: &[LockCodeStatus],
    removes: &[LockCodeStatus],
) -> Result<Decision, &'static str> {
    use LockCodeStatus::*;

    if adds.is_empty() && removes.is_empty() {
        return Err("no entry requests the code");
    }

    let decision = match (exists, !adds.is_empty()) {
        // Present and wanted: nothing to send, just record what we see.
        (true, true) => Decision {
            command: None,
            adds: adds
                .iter()
                .map(|s| match s {
                    Scheduled | Adding => to(Enabled, NOTE_PRESENT),
                    Enabled | Removing | Complete => None,
                })
                .collect(),
            removes: removes
                .iter()
                .map(|s| match s {
                    Complete => None,
                    _ => to(Complete, NOTE_IN_USE),
                })
                .collect(),
        },
        // Present and nobody wants it. Re-issued while already removing.
        (true, false) => Decision {
            command: Some(Command::Remove),
            adds: Vec::new(),
            removes: removes
                .iter()
                .map(|s| match s {
                    Removing => None,
                    _ => to(Removing, NOTE_REMOVING),
                })
                .collect(),
        },
        // Missing and wanted. Re-issued while already adding.
        (false, true) => {
            // Finished history doesn't count.
            if removes.iter().filter(|&&s| s != Complete).count() > 1 {
                return Err("more than one removal requested alongside an add");
            }
            Decision {
                command: Some(Command::Add),
                adds: adds
                    .iter()
                    .map(|s| match s {
                        Scheduled | Enabled => to(Adding, NOTE_ADDING),
                        Adding | Removing | Complete => None,
                    })
                    .collect(),
                removes: removes
                    .iter()
                    .map(|s| match s {
                        Complete => None,
                        _ => to(Complete, NOTE_SHARED),
                    })
                    .collect(),
            }
        }
        // Missing and nobody wants it: settle the history.
        (false, false) => Decision {
            command: None,
            adds: Vec::new(),
            removes: removes
                .iter()
                .map(|s| match s {
                    Removing => to(Complete, NOTE_REMOVED),
                    Complete => None,
                    Scheduled | Adding | Enabled => to(Complete, NOTE_ABSENT),
                })
                .collect(),
        },
    };

    Ok(decision)
}
