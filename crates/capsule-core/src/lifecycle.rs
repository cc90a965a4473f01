//! The lifecycle controller — opening, editing and soft-deleting capsules.
//!
//! A soft delete hides the capsule from every view at once and stashes a
//! snapshot in the [`Trash`]. The record itself stays in the collection until
//! the grace timer fires, at which point it is removed for good. An undo
//! inside the window cancels the timer and brings the capsule back.
//!
//! All controller operations, and every timer expiry, run under a single
//! async mutex around the grace table. Whichever of an undo and an expiry
//! takes that lock first decides the outcome. Once the window has closed the
//! capsule can no longer be restored, even if erasing it failed and is still
//! being retried.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, task::AbortHandle};

use crate::{
  Error, Result,
  capsule::{Capsule, CapsuleEdit, CapsuleId, NewCapsule},
  config::LifecycleConfig,
  kv::KeyValueStore,
  store::CapsuleStore,
  trash::{Origin, Trash, TrashEntry},
};

// ─── Results ─────────────────────────────────────────────────────────────────

/// Result of [`Lifecycle::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
  /// The capsule transitioned to opened by this call.
  Opened(Capsule),
  /// The capsule was already open; nothing was written.
  AlreadyOpen(Capsule),
}

impl OpenOutcome {
  pub fn capsule(&self) -> &Capsule {
    match self {
      Self::Opened(c) | Self::AlreadyOpen(c) => c,
    }
  }

  pub fn into_capsule(self) -> Capsule {
    match self {
      Self::Opened(c) | Self::AlreadyOpen(c) => c,
    }
  }
}

/// A capsule brought back by [`Lifecycle::undo_delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
  pub capsule: Capsule,
  /// The view the capsule returns to.
  pub origin:  Origin,
}

/// True iff the capsule's open date has been reached.
pub fn can_open(capsule: &Capsule) -> bool { capsule.can_open_at(Utc::now()) }

// ─── Grace table ─────────────────────────────────────────────────────────────

struct Grace {
  snapshot:   Capsule,
  origin:     Origin,
  deleted_at: DateTime<Utc>,
  /// Distinguishes this delete from an earlier one of the same id, and keys
  /// the timer in [`Shared::timers`].
  generation: u64,
  /// The window has closed; erasing the record failed and will be retried.
  expired:    bool,
}

type GraceTable = HashMap<CapsuleId, Grace>;

struct Shared<B> {
  store:        CapsuleStore<B>,
  trash:        Trash<B>,
  grace:        Mutex<GraceTable>,
  /// Abort handles of live timers, by generation. Never held across an
  /// await, so teardown can always take it.
  timers:       StdMutex<HashMap<u64, AbortHandle>>,
  grace_period: Duration,
  generation:   AtomicU64,
}

// ─── Controller ──────────────────────────────────────────────────────────────

/// Owns the capsule collection, the trash and all pending grace timers.
///
/// Dropping the controller (or calling [`Lifecycle::shutdown`]) cancels every
/// timer. Trash entries outlive it and are picked up by the next controller
/// opened on the same backend.
pub struct Lifecycle<B: KeyValueStore + 'static> {
  shared: Arc<Shared<B>>,
}

impl<B: KeyValueStore + 'static> Lifecycle<B> {
  /// Build a controller over `kv` and recover any soft deletes left in the
  /// trash by a previous controller.
  pub async fn new(kv: Arc<B>, config: LifecycleConfig) -> Self {
    let shared = Arc::new(Shared {
      store:        CapsuleStore::new(Arc::clone(&kv), config.collection_key.clone()),
      trash:        Trash::new(kv, config.trash_key.clone()),
      grace:        Mutex::new(HashMap::new()),
      timers:       StdMutex::new(HashMap::new()),
      grace_period: config.grace_period(),
      generation:   AtomicU64::new(0),
    });
    let lifecycle = Self { shared };
    lifecycle.recover(Utc::now()).await;
    lifecycle
  }

  /// Direct access to the underlying collection, bypassing the grace table.
  pub fn store(&self) -> &CapsuleStore<B> { &self.shared.store }

  pub fn grace_period(&self) -> Duration { self.shared.grace_period }

  // ── Views ───────────────────────────────────────────────────────────────

  /// A visible capsule by id. Capsules inside their undo window are hidden.
  pub async fn get(&self, id: &CapsuleId) -> Option<Capsule> {
    let grace = self.shared.grace.lock().await;
    self.shared.visible(&grace, id).await.ok()
  }

  /// Unopened capsules, soonest open date first.
  pub async fn pending(&self) -> Vec<Capsule> {
    let mut list = self.visible_where(|c| !c.is_opened).await;
    list.sort_by_key(|c| c.open_date);
    list
  }

  /// Opened capsules, latest open date first.
  pub async fn opened(&self) -> Vec<Capsule> {
    let mut list = self.visible_where(|c| c.is_opened).await;
    list.sort_by(|a, b| b.open_date.cmp(&a.open_date));
    list
  }

  /// The snapshot held for a capsule inside its undo window, if any.
  pub async fn trashed(&self, id: &CapsuleId) -> Option<Capsule> {
    let grace = self.shared.grace.lock().await;
    if let Some(g) = grace.get(id) {
      return (!g.expired).then(|| g.snapshot.clone());
    }
    self
      .shared
      .trash
      .get(id)
      .await
      .filter(|e| self.shared.time_left(e.deleted_at, Utc::now()).is_some())
      .map(|e| e.capsule)
  }

  async fn visible_where(&self, keep: impl Fn(&Capsule) -> bool) -> Vec<Capsule> {
    let grace = self.shared.grace.lock().await;
    let hidden = self.shared.hidden(&grace).await;
    let mut all = self.shared.store.get_all().await;
    all.retain(|c| keep(c) && !hidden.contains(&c.id));
    all
  }

  // ── Create / edit ───────────────────────────────────────────────────────

  pub async fn create(&self, input: NewCapsule) -> Result<Capsule> {
    let capsule = Capsule::new(input, Utc::now())?;
    self.shared.store.save(capsule.clone()).await?;
    tracing::info!(id = %capsule.id, open_date = %capsule.open_date, "capsule sealed");
    Ok(capsule)
  }

  /// Replace the editable fields of a pending capsule.
  pub async fn edit(&self, id: &CapsuleId, edit: CapsuleEdit) -> Result<Capsule> {
    let grace = self.shared.grace.lock().await;
    let mut capsule = self.shared.visible(&grace, id).await?;
    capsule.apply(edit)?;
    self.shared.store.update(capsule.clone()).await?;
    tracing::debug!(%id, "capsule edited");
    Ok(capsule)
  }

  // ── Open ────────────────────────────────────────────────────────────────

  pub async fn open(&self, id: &CapsuleId) -> Result<OpenOutcome> {
    self.open_at(id, Utc::now()).await
  }

  /// Open `id` as of `now`. Fails with [`Error::StillSealed`] before the open
  /// date; repeat calls on an opened capsule report
  /// [`OpenOutcome::AlreadyOpen`] without writing.
  pub async fn open_at(&self, id: &CapsuleId, now: DateTime<Utc>) -> Result<OpenOutcome> {
    let grace = self.shared.grace.lock().await;
    let mut capsule = self.shared.visible(&grace, id).await?;
    if capsule.is_opened {
      return Ok(OpenOutcome::AlreadyOpen(capsule));
    }
    if !capsule.can_open_at(now) {
      return Err(Error::StillSealed(capsule.id, capsule.open_date));
    }
    capsule.is_opened = true;
    self.shared.store.update(capsule.clone()).await?;
    tracing::info!(%id, "capsule opened");
    Ok(OpenOutcome::Opened(capsule))
  }

  // ── Soft delete ─────────────────────────────────────────────────────────

  /// Hide `id` and schedule its permanent removal after the grace period.
  /// Returns the snapshot that [`Lifecycle::undo_delete`] would restore.
  ///
  /// The snapshot is committed to the trash before the capsule is hidden, so
  /// a failed commit leaves every view unchanged.
  pub async fn soft_delete(&self, id: &CapsuleId) -> Result<Capsule> {
    let mut grace = self.shared.grace.lock().await;
    let capsule = self.shared.visible(&grace, id).await?;
    let origin = Origin::of(&capsule);
    let deleted_at = Utc::now();

    self
      .shared
      .trash
      .stash(TrashEntry { capsule: capsule.clone(), origin, deleted_at })
      .await?;

    let entry = Shared::arm(
      &self.shared,
      capsule.clone(),
      origin,
      deleted_at,
      self.shared.grace_period,
    );
    grace.insert(id.clone(), entry);
    tracing::info!(%id, ?origin, grace = ?self.shared.grace_period, "capsule soft-deleted");
    Ok(capsule)
  }

  /// Bring back a soft-deleted capsule.
  ///
  /// Fails with [`Error::RestoreExpired`] once the grace period has closed.
  /// On any other error the collection and the trash are left as they were
  /// and the pending delete still runs.
  pub async fn undo_delete(&self, id: &CapsuleId) -> Result<Restored> {
    let mut grace = self.shared.grace.lock().await;

    let entry = match grace.get(id) {
      Some(g) if g.expired => {
        tracing::debug!(%id, "undo arrived after the grace period");
        return Err(Error::RestoreExpired(id.clone()));
      }
      Some(g) => TrashEntry {
        capsule:    g.snapshot.clone(),
        origin:     g.origin,
        deleted_at: g.deleted_at,
      },
      None => match self.shared.trash.get(id).await {
        Some(entry) if self.shared.time_left(entry.deleted_at, Utc::now()).is_some() => entry,
        Some(_) => {
          tracing::debug!(%id, "trash entry outlived its grace period");
          self.shared.finalize(id).await;
          return Err(Error::RestoreExpired(id.clone()));
        }
        None => {
          tracing::debug!(%id, "undo arrived after the grace period");
          return Err(Error::RestoreExpired(id.clone()));
        }
      },
    };

    self.shared.trash.clear(id).await?;
    if self.shared.store.get_by_id(id).await.is_none()
      && let Err(e) = self.shared.store.save(entry.capsule.clone()).await
    {
      if let Err(stash_err) = self.shared.trash.stash(entry).await {
        tracing::error!(%id, error = %stash_err, "failed to put trash entry back");
      }
      return Err(e);
    }

    if let Some(g) = grace.remove(id) {
      self.shared.cancel(g.generation);
    }
    tracing::info!(%id, origin = ?entry.origin, "capsule restored");
    Ok(Restored { capsule: entry.capsule, origin: entry.origin })
  }

  // ── Recovery / teardown ─────────────────────────────────────────────────

  /// Finalize trash entries whose window already closed and re-arm the rest.
  async fn recover(&self, now: DateTime<Utc>) {
    let mut grace = self.shared.grace.lock().await;
    for (id, entry) in self.shared.trash.entries().await {
      if grace.contains_key(&id) {
        continue;
      }
      match self.shared.time_left(entry.deleted_at, now) {
        Some(left) => {
          tracing::debug!(%id, left = ?left, "re-arming soft delete");
          let g = Shared::arm(
            &self.shared,
            entry.capsule,
            entry.origin,
            entry.deleted_at,
            left,
          );
          grace.insert(id, g);
        }
        None => {
          if !self.shared.finalize(&id).await {
            let g = Shared::retry(&self.shared, entry);
            grace.insert(id, g);
          }
        }
      }
    }
  }

  /// Cancel every pending timer. Soft-deleted capsules stay in the trash.
  pub async fn shutdown(self) {
    self.shared.grace.lock().await.clear();
    self.shared.cancel_all();
  }
}

impl<B: KeyValueStore + 'static> Drop for Lifecycle<B> {
  fn drop(&mut self) { self.shared.cancel_all(); }
}

// ─── Shared internals ────────────────────────────────────────────────────────

impl<B: KeyValueStore + 'static> Shared<B> {
  /// Spawn the expiry timer for one soft delete.
  ///
  /// The task holds only a weak reference, so a dropped controller never
  /// finalizes anything.
  fn arm(
    this: &Arc<Self>,
    snapshot: Capsule,
    origin: Origin,
    deleted_at: DateTime<Utc>,
    delay: Duration,
  ) -> Grace {
    let generation = this.generation.fetch_add(1, Ordering::Relaxed);
    let weak: Weak<Self> = Arc::downgrade(this);
    let id = snapshot.id.clone();

    let mut timers = this.timers();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if let Some(shared) = weak.upgrade() {
        Self::expire(&shared, &id, generation).await;
        shared.timers().remove(&generation);
      }
    });
    timers.insert(generation, handle.abort_handle());

    Grace { snapshot, origin, deleted_at, generation, expired: false }
  }

  /// Arm another attempt at erasing a capsule whose window already closed.
  fn retry(this: &Arc<Self>, entry: TrashEntry) -> Grace {
    let mut g = Self::arm(
      this,
      entry.capsule,
      entry.origin,
      entry.deleted_at,
      this.grace_period,
    );
    g.expired = true;
    g
  }

  async fn expire(this: &Arc<Self>, id: &CapsuleId, generation: u64) {
    let mut grace = this.grace.lock().await;
    match grace.get(id) {
      Some(g) if g.generation == generation => {}
      _ => return,
    }
    let Some(g) = grace.remove(id) else { return };
    if this.finalize(id).await {
      return;
    }
    tracing::warn!(%id, retry_in = ?this.grace_period, "will retry erasing capsule");
    let entry = TrashEntry { capsule: g.snapshot, origin: g.origin, deleted_at: g.deleted_at };
    grace.insert(id.clone(), Self::retry(this, entry));
  }

  /// Permanently erase `id`: collection first, then its trash entry.
  /// Returns whether both steps succeeded.
  async fn finalize(&self, id: &CapsuleId) -> bool {
    if let Err(e) = self.store.remove(id).await {
      tracing::error!(%id, error = %e, "failed to erase soft-deleted capsule");
      return false;
    }
    if let Err(e) = self.trash.clear(id).await {
      tracing::error!(%id, error = %e, "failed to clear trash entry");
      return false;
    }
    tracing::info!(%id, "capsule permanently deleted");
    true
  }

  /// Time left in the undo window of a delete made at `deleted_at`, or
  /// `None` once it has closed.
  fn time_left(&self, deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let elapsed = (now - deleted_at).to_std().unwrap_or(Duration::ZERO);
    self.grace_period.checked_sub(elapsed).filter(|left| !left.is_zero())
  }

  fn timers(&self) -> StdMutexGuard<'_, HashMap<u64, AbortHandle>> {
    self.timers.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn cancel(&self, generation: u64) {
    if let Some(handle) = self.timers().remove(&generation) {
      handle.abort();
    }
  }

  fn cancel_all(&self) {
    for (_, handle) in self.timers().drain() {
      handle.abort();
    }
  }

  /// Ids currently inside an undo window, in memory or in the trash.
  async fn hidden(&self, grace: &GraceTable) -> HashSet<CapsuleId> {
    let mut ids: HashSet<_> = grace.keys().cloned().collect();
    ids.extend(self.trash.entries().await.into_keys());
    ids
  }

  /// Look up a capsule that is neither absent nor soft-deleted.
  async fn visible(&self, grace: &GraceTable, id: &CapsuleId) -> Result<Capsule> {
    if self.hidden(grace).await.contains(id) {
      return Err(Error::NotFound(id.clone()));
    }
    self
      .store
      .get_by_id(id)
      .await
      .ok_or_else(|| Error::NotFound(id.clone()))
  }
}
