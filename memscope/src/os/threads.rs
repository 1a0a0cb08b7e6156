/*!
Thread enumeration.
*/

use log::{debug, warn};

use super::{OsBackend, ThreadHandle, ThreadSnapshot};
use crate::error::{Error, ErrorOrigin, Result};
use crate::types::{Pid, ThreadId};

/// Returns the ids of all threads currently owned by `pid`.
///
/// Fails only if the snapshot can not be created or its first entry can not be read.
/// The snapshot is released on every path.
pub fn thread_ids<B: OsBackend>(os: &mut B, pid: Pid) -> Result<Vec<ThreadId>> {
    let mut snapshot = os.thread_snapshot().map_err(|err| {
        Error(ErrorOrigin::Threads, err.kind()).log_debug("unable to create thread snapshot")
    })?;

    let mut entry = Some(snapshot.first_entry().map_err(|err| {
        Error(ErrorOrigin::Threads, err.kind()).log_debug("unable to read first thread entry")
    })?);

    let mut ids = Vec::new();
    while let Some(e) = entry {
        if e.owner == pid {
            ids.push(e.id);
        }
        entry = snapshot.next_entry();
    }

    debug!("process {} owns {} threads", pid, ids.len());
    Ok(ids)
}

/// Opens a control handle to each thread.
///
/// Threads which can not be opened are logged and left out.
pub fn open_threads<B: OsBackend>(os: &mut B, ids: &[ThreadId]) -> Vec<B::Thread> {
    ids.iter()
        .filter_map(|&id| match os.open_thread(id) {
            Ok(thread) => Some(thread),
            Err(err) => {
                warn!("unable to open thread {}: {}", id, err);
                None
            }
        })
        .inspect(|thread| debug!("opened thread {}", thread.id()))
        .collect()
}
