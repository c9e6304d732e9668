//! The transactional stream facade.
//!
//! [`AcidStream`] wraps a target stream and a backup (journal) stream and
//! makes every mutation of the target atomically undoable. All operations
//! on one instance are serialized by a single gate; every operation that
//! performs I/O exists in a blocking form and a suspending `*_async` form
//! with identical observable behavior.
//!
//! ## Concurrency
//!
//! The gate is a `tokio::sync::Mutex`. The blocking path acquires it with
//! `blocking_lock`; the suspending path acquires it with `lock_owned().await`
//! (cancellable before any I/O happens) and then moves the owned guard into
//! `spawn_blocking`, so one mutation - or one rollback record - is a
//! non-cancellable unit. Dropping a suspending rollback future between
//! records leaves the journal's remaining records intact: the session is
//! still open and a retried rollback converges.
//!
//! The blocking operations must not be called from inside an async runtime;
//! use the `*_async` forms there.

use crate::config::AcidConfig;
use crate::error::{CoreError, CoreResult};
use crate::journal::record::HEADER_LEN;
use crate::journal::{reader, writer, JournalStats, Record};
use crate::registry;
use crate::rollback::{self, RollbackPass};
use acidstream_storage::{MemoryStream, Stream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task;
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything behind the gate: both stream handles and the session flag.
///
/// The blocking core routines live here; both the blocking and suspending
/// facade paths drive them, so the two paths cannot diverge in behavior.
pub(crate) struct Session {
    target: Box<dyn Stream>,
    backup: Box<dyn Stream>,
    config: AcidConfig,
    needs_commit: bool,
}

impl Session {
    fn refresh_needs_commit(&mut self) -> CoreResult<()> {
        self.needs_commit = self.backup.len()? > HEADER_LEN;
        Ok(())
    }

    /// Removes a just-appended record after its mutation could not proceed,
    /// keeping the session flag in step with the journal. The caller's
    /// error wins; failures here are logged and the record stays in the
    /// journal for a later rollback.
    fn abandon_record(&mut self, rec: Option<&Record>) {
        if let Some(rec) = rec {
            if let Err(err) =
                rollback::undo_record(self.target.as_mut(), self.backup.as_mut(), rec)
            {
                warn!(error = %err, "failed to remove journal record after aborted mutation");
            }
        }
        if let Err(err) = self.refresh_needs_commit() {
            warn!(error = %err, "failed to refresh session flag after aborted mutation");
        }
    }

    fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.target.read_at(offset, len)?)
    }

    fn target_len(&self) -> CoreResult<u64> {
        Ok(self.target.len()?)
    }

    /// Journals the pre-image, then applies the write to the target.
    fn write_at(&mut self, position: u64, data: &[u8]) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let rec = writer::capture_write(
            self.target.as_ref(),
            self.backup.as_mut(),
            position,
            data.len() as u64,
        )?;
        if self.config.auto_flush_backup {
            if let Err(err) = self.backup.flush() {
                self.abandon_record(rec.as_ref());
                return Err(err.into());
            }
        }

        if let Err(err) = self.target.write_at(position, data) {
            // The journal already holds the record for a mutation that was
            // never (fully) applied: compensate by undoing it again.
            self.abandon_record(rec.as_ref());
            return Err(err.into());
        }

        self.needs_commit = self.needs_commit || rec.is_some();
        if self.config.auto_flush_target {
            self.target.flush()?;
        }
        Ok(())
    }

    /// Journals the pre-image, then applies the length change.
    fn set_len(&mut self, new_len: u64) -> CoreResult<()> {
        let rec =
            writer::capture_set_len(self.target.as_ref(), self.backup.as_mut(), new_len)?;
        let Some(rec) = rec else {
            return Ok(());
        };
        if self.config.auto_flush_backup {
            if let Err(err) = self.backup.flush() {
                self.abandon_record(Some(&rec));
                return Err(err.into());
            }
        }

        if let Err(err) = self.target.set_len(new_len) {
            self.abandon_record(Some(&rec));
            return Err(err.into());
        }

        self.needs_commit = true;
        if self.config.auto_flush_target {
            self.target.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.target.flush()?;
        self.backup.flush()?;
        Ok(())
    }

    /// Discards all undo records; the target's current state becomes the
    /// new durable baseline. Never touches the target.
    fn commit(&mut self) -> CoreResult<()> {
        let len = self.target.len()?;
        writer::initialize(self.backup.as_mut(), len)?;
        // The journal is empty from here on, whatever the flush says.
        self.needs_commit = false;
        if self.config.auto_flush_backup {
            self.backup.flush()?;
        }
        debug!(snapshot_len = len, "committed session");
        Ok(())
    }

    fn rollback_begin(&mut self) -> CoreResult<RollbackPass> {
        RollbackPass::begin(self.backup.as_ref())
    }

    fn rollback_step(&mut self, pass: &mut RollbackPass) -> CoreResult<bool> {
        pass.step(self.target.as_mut(), self.backup.as_ref())
    }

    fn rollback_finish(&mut self, pass: RollbackPass) -> CoreResult<()> {
        let snapshot_len = pass.snapshot_len();
        pass.finish(
            self.target.as_mut(),
            self.backup.as_mut(),
            self.config.auto_flush_target,
        )?;
        self.needs_commit = false;
        debug!(snapshot_len, "rolled back session");
        Ok(())
    }

    /// Full reverse replay in one call (blocking path).
    fn rollback(&mut self) -> CoreResult<()> {
        let mut pass = self.rollback_begin()?;
        while self.rollback_step(&mut pass)? {}
        self.rollback_finish(pass)
    }

    fn journal_stats(&self) -> CoreResult<JournalStats> {
        reader::stats(self.backup.as_ref())
    }
}

/// A stream decorator providing atomic, undoable mutation of a target
/// stream via a companion journal.
///
/// Every mutation (positioned write, length change) first appends an undo
/// record to the backup stream, then applies the mutation to the target.
/// [`AcidStream::rollback`] replays the journal in reverse to restore the
/// target byte-for-byte to its state at the last [`AcidStream::commit`]
/// (or at open). Dropping an instance with an open session attempts a
/// best-effort rollback.
///
/// # Example
///
/// ```rust
/// use acidstream_core::{AcidConfig, AcidStream};
/// use acidstream_storage::MemoryStream;
///
/// let target = Box::new(MemoryStream::with_data(vec![0xAA; 100]));
/// let backup = Box::new(MemoryStream::new());
/// let stream = AcidStream::open(target, backup, AcidConfig::default()).unwrap();
///
/// stream.write(50, &[0xBB; 10]).unwrap();
/// assert!(stream.needs_commit());
///
/// stream.rollback().unwrap();
/// assert_eq!(stream.read_at(50, 10).unwrap(), vec![0xAA; 10]);
/// assert!(!stream.needs_commit());
/// ```
pub struct AcidStream {
    session: Arc<AsyncMutex<Session>>,
    /// Lock-free mirror of the session's `needs_commit` flag.
    needs_commit: Arc<AtomicBool>,
    instance_id: Uuid,
}

impl AcidStream {
    /// Opens an ACID stream over the given target and backup streams.
    ///
    /// The instance takes exclusive ownership of both handles. An empty
    /// backup stream is initialized with a fresh header at the target's
    /// current length. A backup stream holding a well-formed journal with
    /// pending records resumes that session (`needs_commit` is `true` and
    /// the caller may roll back or commit).
    ///
    /// # Errors
    ///
    /// Returns an error if either stream fails, or
    /// [`CoreError::JournalCorruption`] if the backup stream holds data
    /// that is not a well-formed journal.
    pub fn open(
        target: Box<dyn Stream>,
        backup: Box<dyn Stream>,
        config: AcidConfig,
    ) -> CoreResult<Self> {
        let mut session = Session {
            target,
            backup,
            config,
            needs_commit: false,
        };

        if session.backup.is_empty()? {
            let len = session.target.len()?;
            writer::initialize(session.backup.as_mut(), len)?;
        } else {
            // Validate header and every frame before trusting the journal.
            reader::read_snapshot_len(session.backup.as_ref())?;
            let pending = reader::count_records(session.backup.as_ref())?;
            if pending == 0 {
                // Stale but empty journal: refresh the snapshot.
                let len = session.target.len()?;
                writer::initialize(session.backup.as_mut(), len)?;
            } else {
                session.needs_commit = true;
                debug!(pending, "resuming open journal session");
            }
        }

        let label = session
            .config
            .label
            .clone()
            .unwrap_or_else(|| "acid-stream".to_string());
        let needs_commit = session.needs_commit;
        let instance_id = registry::register(label);
        debug!(%instance_id, needs_commit, "opened acid stream");

        Ok(Self {
            session: Arc::new(AsyncMutex::new(session)),
            needs_commit: Arc::new(AtomicBool::new(needs_commit)),
            instance_id,
        })
    }

    /// Opens an ACID stream with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`AcidStream::open`].
    pub fn open_default(target: Box<dyn Stream>, backup: Box<dyn Stream>) -> CoreResult<Self> {
        Self::open(target, backup, AcidConfig::default())
    }

    /// Opens an ACID stream over fresh in-memory target and backup streams.
    ///
    /// Intended for tests and ephemeral use.
    ///
    /// # Errors
    ///
    /// See [`AcidStream::open`].
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_default(Box::new(MemoryStream::new()), Box::new(MemoryStream::new()))
    }

    /// Runs a closure under the gate on the blocking path, keeping the
    /// lock-free flag mirror in sync.
    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> CoreResult<R>) -> CoreResult<R> {
        let mut session = self.session.blocking_lock();
        let result = f(&mut session);
        self.needs_commit
            .store(session.needs_commit, Ordering::SeqCst);
        result
    }

    /// Acquires the gate cooperatively, then runs the closure as one
    /// non-cancellable blocking unit.
    async fn with_session_async<R, F>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&mut Session) -> CoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let guard = Arc::clone(&self.session).lock_owned().await;
        let mirror = Arc::clone(&self.needs_commit);
        task::spawn_blocking(move || {
            let mut session = guard;
            let result = f(&mut session);
            mirror.store(session.needs_commit, Ordering::SeqCst);
            result
        })
        .await?
    }

    /// Reads `len` bytes from the target at `offset`.
    ///
    /// Reads are not journaled; this is a passthrough under the gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or extends past the target end.
    pub fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        self.with_session(|s| s.read_at(offset, len))
    }

    /// Suspending form of [`AcidStream::read_at`].
    ///
    /// # Errors
    ///
    /// See [`AcidStream::read_at`].
    pub async fn read_at_async(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        self.with_session_async(move |s| s.read_at(offset, len)).await
    }

    /// Writes `data` to the target at `position`, journaling the pre-image
    /// of any overwritten bytes first.
    ///
    /// # Errors
    ///
    /// Returns an error if capturing or appending the undo record fails
    /// (the target is then untouched), or if applying the write fails (the
    /// just-appended record is compensated away).
    pub fn write(&self, position: u64, data: &[u8]) -> CoreResult<()> {
        self.with_session(|s| s.write_at(position, data))
    }

    /// Suspending form of [`AcidStream::write`].
    ///
    /// # Errors
    ///
    /// See [`AcidStream::write`].
    pub async fn write_async(&self, position: u64, data: &[u8]) -> CoreResult<()> {
        let data = data.to_vec();
        self.with_session_async(move |s| s.write_at(position, &data))
            .await
    }

    /// Changes the target's length, journaling the pre-image first.
    ///
    /// Shrinking journals the truncated tail; growing journals only the
    /// old length.
    ///
    /// # Errors
    ///
    /// See [`AcidStream::write`]; the same capture-before-apply contract
    /// holds.
    pub fn set_len(&self, new_len: u64) -> CoreResult<()> {
        self.with_session(|s| s.set_len(new_len))
    }

    /// Suspending form of [`AcidStream::set_len`].
    ///
    /// # Errors
    ///
    /// See [`AcidStream::set_len`].
    pub async fn set_len_async(&self, new_len: u64) -> CoreResult<()> {
        self.with_session_async(move |s| s.set_len(new_len)).await
    }

    /// Returns the target's current length.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    pub fn len(&self) -> CoreResult<u64> {
        self.with_session(|s| s.target_len())
    }

    /// Returns `true` if the target holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Flushes both the target and the backup stream.
    ///
    /// # Errors
    ///
    /// Returns an error if either flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.with_session(|s| s.flush())
    }

    /// Suspending form of [`AcidStream::flush`].
    ///
    /// # Errors
    ///
    /// See [`AcidStream::flush`].
    pub async fn flush_async(&self) -> CoreResult<()> {
        self.with_session_async(|s| s.flush()).await
    }

    /// Commits the session: discards all undo records and makes the
    /// target's current state the new baseline.
    ///
    /// Committing with no pending records is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if resetting the journal fails.
    pub fn commit(&self) -> CoreResult<()> {
        self.with_session(|s| s.commit())
    }

    /// Suspending form of [`AcidStream::commit`].
    ///
    /// # Errors
    ///
    /// See [`AcidStream::commit`].
    pub async fn commit_async(&self) -> CoreResult<()> {
        self.with_session_async(|s| s.commit()).await
    }

    /// Rolls back the session: undoes every journaled mutation in reverse
    /// order, restores the target's length to the snapshot, and resets the
    /// journal.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RollbackFailed`] if undoing a record fails; the
    /// target must then be treated as inconsistent until a retried rollback
    /// completes.
    pub fn rollback(&self) -> CoreResult<()> {
        self.with_session(|s| s.rollback())
    }

    /// Suspending form of [`AcidStream::rollback`].
    ///
    /// Each record's inverse application is a non-cancellable unit, but the
    /// future may be dropped *between* records: the remaining records and
    /// the open-session flag stay intact, and a retried rollback converges.
    ///
    /// # Errors
    ///
    /// See [`AcidStream::rollback`].
    pub async fn rollback_async(&self) -> CoreResult<()> {
        let guard = Arc::clone(&self.session).lock_owned().await;
        let mirror = Arc::clone(&self.needs_commit);

        let mut state: (OwnedMutexGuard<Session>, RollbackPass) =
            task::spawn_blocking(move || {
                let mut session = guard;
                let pass = session.rollback_begin()?;
                Ok::<_, CoreError>((session, pass))
            })
            .await??;

        while !state.1.is_done() {
            state = task::spawn_blocking(move || {
                let (mut session, mut pass) = state;
                session.rollback_step(&mut pass)?;
                Ok::<_, CoreError>((session, pass))
            })
            .await??;
        }

        task::spawn_blocking(move || {
            let (mut session, pass) = state;
            let result = session.rollback_finish(pass);
            mirror.store(session.needs_commit, Ordering::SeqCst);
            result
        })
        .await?
    }

    /// Returns `true` if the journal holds uncommitted records.
    ///
    /// Lock-free; safe to call from any context.
    #[must_use]
    pub fn needs_commit(&self) -> bool {
        self.needs_commit.load(Ordering::SeqCst)
    }

    /// Returns `true` if a transaction session is open.
    ///
    /// A session begins when the journal transitions from empty to
    /// non-empty and ends on commit or rollback, so this is equivalent to
    /// [`AcidStream::needs_commit`].
    #[must_use]
    pub fn is_in_session(&self) -> bool {
        self.needs_commit()
    }

    /// Returns this instance's diagnostics registry id.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Summarizes the journal: snapshot length, pending record count, size.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read.
    pub fn journal_stats(&self) -> CoreResult<JournalStats> {
        self.with_session(|s| s.journal_stats())
    }

    /// Suspending form of [`AcidStream::journal_stats`].
    ///
    /// # Errors
    ///
    /// See [`AcidStream::journal_stats`].
    pub async fn journal_stats_async(&self) -> CoreResult<JournalStats> {
        self.with_session_async(|s| s.journal_stats()).await
    }
}

impl std::fmt::Debug for AcidStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcidStream")
            .field("instance_id", &self.instance_id)
            .field("needs_commit", &self.needs_commit())
            .finish_non_exhaustive()
    }
}

impl Drop for AcidStream {
    fn drop(&mut self) {
        registry::unregister(self.instance_id);

        if !self.needs_commit.load(Ordering::SeqCst) {
            return;
        }

        // Disposal must not block or panic. If the gate is somehow still
        // contended, the journal keeps everything needed for a later
        // rollback of the same backup stream.
        let Ok(mut session) = self.session.try_lock() else {
            warn!(instance_id = %self.instance_id, "dropped with open session and contended gate");
            return;
        };
        if let Err(err) = session.rollback() {
            match &session.config.error_sink {
                Some(sink) => sink(&err),
                None => {
                    warn!(instance_id = %self.instance_id, error = %err, "best-effort rollback on drop failed");
                }
            }
        }
    }
}
