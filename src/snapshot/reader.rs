//! Consistent, read-only snapshots of the working tree.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SnapshotError, VcsError};
use crate::vcs::{HeadRef, VcsRead};

use super::{ChangeRecord, Snapshot};

/// A snapshot is attempted at most this many times before giving up.
pub const MAX_READ_ATTEMPTS: u32 = 2;

type Scan = (HeadRef, Vec<ChangeRecord>);

/// Produces [`Snapshot`]s with monotonically increasing sequence numbers.
#[derive(Debug)]
pub struct SnapshotReader {
    next_sequence: u64,
}

impl Default for SnapshotReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotReader {
    pub fn new() -> Self {
        Self { next_sequence: 1 }
    }

    /// Read the pending changes of the repository behind `backend`.
    ///
    /// Each attempt scans the tree twice and only accepts the result when both
    /// scans agree. A disagreement, or a file vanishing while it is hashed,
    /// triggers one more attempt; after that the read fails with
    /// [`SnapshotError::InconsistentRead`].
    pub fn snapshot<B>(
        &mut self,
        backend: &B,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, SnapshotError>
    where
        B: VcsRead + ?Sized,
    {
        for attempt in 1..=MAX_READ_ATTEMPTS {
            match read_consistent(backend, cancel)? {
                Some((head, records)) => {
                    let sequence = self.next_sequence;
                    self.next_sequence += 1;
                    debug!(
                        "Snapshot #{} at {}: {} changed paths",
                        sequence,
                        head,
                        records.len()
                    );
                    return Ok(Snapshot::new(sequence, head, records));
                }
                None => debug!("Working tree changed during read (attempt {})", attempt),
            }
        }

        Err(SnapshotError::InconsistentRead {
            attempts: MAX_READ_ATTEMPTS,
        })
    }
}

/// Scan twice; `Ok(None)` means the tree moved underneath us.
fn read_consistent<B>(backend: &B, cancel: &CancellationToken) -> Result<Option<Scan>, VcsError>
where
    B: VcsRead + ?Sized,
{
    let Some(first) = scan(backend, cancel)? else {
        return Ok(None);
    };
    let Some(second) = scan(backend, cancel)? else {
        return Ok(None);
    };

    Ok((first == second).then_some(first))
}

fn scan<B>(backend: &B, cancel: &CancellationToken) -> Result<Option<Scan>, VcsError>
where
    B: VcsRead + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(VcsError::Cancelled);
    }

    let head = backend.head_ref()?;
    let mut records = match backend.status_diff(cancel) {
        Ok(records) => records,
        Err(VcsError::Vanished(path)) => {
            debug!("{} vanished mid-read", path);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    records.sort_by(|a, b| a.path.cmp(&b.path));

    // A commit landing mid-scan shows up as a moved head.
    if backend.head_ref()? != head {
        return Ok(None);
    }

    Ok(Some((head, records)))
}
