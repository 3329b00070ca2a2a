use std::collections::BTreeMap;

use persistence::{Database, PathColumn, PersistenceError, RecordTable, StoredRecord};

use crate::error::{HookError, WorldError};
use crate::ids::{AccountId, ChannelId, ObjectId, ScriptId, SessionId};
use crate::model::{
    AccountRecord, ChannelRecord, ObjectRecord, Record, ScriptRecord, ScriptState, Tag,
    ACCOUNT_CATEGORY, PUPPETED_TAG,
};
use crate::typeclass::{InstanceHook, TypeclassRegistry};

/// One isolated hook failure inside a batch.
#[derive(Debug, Clone)]
pub struct HookFailure {
    pub instance: String,
    pub hook: &'static str,
    pub error: HookError,
}

#[derive(Debug, Default)]
pub struct HookReport {
    pub invoked: usize,
    pub failures: Vec<HookFailure>,
}

impl HookReport {
    pub fn merge(&mut self, other: HookReport) {
        self.invoked += other.invoked;
        self.failures.extend(other.failures);
    }
}

/// What a cold stop did to the script table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStopReport {
    pub stopped: usize,
    pub deleted: usize,
}

/// What the post-start script pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScriptRestartReport {
    pub resumed: usize,
    pub restarted: usize,
    pub removed: usize,
}

/// Gives generic code access to the cache map of one record type.
pub trait Cached: Record {
    #[doc(hidden)]
    fn cache(world: &World) -> &BTreeMap<Self::Id, Self>;
    #[doc(hidden)]
    fn cache_mut(world: &mut World) -> &mut BTreeMap<Self::Id, Self>;
}

macro_rules! impl_cached {
    ($record:ty, $field:ident) => {
        impl Cached for $record {
            fn cache(world: &World) -> &BTreeMap<Self::Id, Self> {
                &world.$field
            }
            fn cache_mut(world: &mut World) -> &mut BTreeMap<Self::Id, Self> {
                &mut world.$field
            }
        }
    };
}

impl_cached!(ObjectRecord, objects);
impl_cached!(AccountRecord, accounts);
impl_cached!(ScriptRecord, scripts);
impl_cached!(ChannelRecord, channels);

/// Entity-instance cache over the persistent record tables.
///
/// Every mutation is written through to the database before returning, so
/// evicting an instance never loses state. Once [`mark_initialized`] has
/// been called, instances entering the cache get `at_init`.
///
/// [`mark_initialized`]: World::mark_initialized
pub struct World {
    db: Database,
    typeclasses: TypeclassRegistry,
    objects: BTreeMap<ObjectId, ObjectRecord>,
    accounts: BTreeMap<AccountId, AccountRecord>,
    scripts: BTreeMap<ScriptId, ScriptRecord>,
    channels: BTreeMap<ChannelId, ChannelRecord>,
    initialized: bool,
}

impl World {
    pub fn new(db: Database, typeclasses: TypeclassRegistry) -> Self {
        Self {
            db,
            typeclasses,
            objects: BTreeMap::new(),
            accounts: BTreeMap::new(),
            scripts: BTreeMap::new(),
            channels: BTreeMap::new(),
            initialized: false,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn typeclasses(&self) -> &TypeclassRegistry {
        &self.typeclasses
    }

    pub fn typeclasses_mut(&mut self) -> &mut TypeclassRegistry {
        &mut self.typeclasses
    }

    pub fn reconnect(&mut self) -> Result<(), WorldError> {
        self.db.reconnect()?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// From now on every instance loaded into the cache runs `at_init`.
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    // --- encoding ---------------------------------------------------------

    fn decode<R: Record>(stored: StoredRecord) -> Result<R, WorldError> {
        let mut record: R =
            serde_json::from_value(stored.body).map_err(|e| PersistenceError::Corrupt {
                table: R::TABLE.name(),
                reason: format!("row {}: {e}", stored.id),
            })?;
        record.assign_id(R::Id::from(stored.id));
        record.set_columns(stored.typeclass_path, stored.cmdset_storage);
        Ok(record)
    }

    fn encode<R: Record>(record: &R) -> Result<StoredRecord, WorldError> {
        Ok(StoredRecord {
            id: record.id().into(),
            typeclass_path: record.typeclass_path().to_string(),
            cmdset_storage: record.cmdset_storage().map(str::to_string),
            body: serde_json::to_value(record)?,
        })
    }

    fn persist<R: Record>(&self, record: &R) -> Result<(), WorldError> {
        let stored = Self::encode(record)?;
        if !self.db.records().update(R::TABLE, &stored)? {
            return Err(WorldError::NotFound {
                kind: R::KIND,
                id: stored.id,
            });
        }
        Ok(())
    }

    /// Every stored record of one type, bypassing the cache.
    pub fn stored<R: Record>(&self) -> Result<Vec<R>, WorldError> {
        self.db
            .records()
            .load_all(R::TABLE)?
            .into_iter()
            .map(Self::decode::<R>)
            .collect()
    }

    // --- cache ------------------------------------------------------------

    /// Load every stored record into the cache. Already cached instances
    /// are kept as they are.
    pub fn warm(&mut self) -> Result<usize, WorldError> {
        Ok(self.warm_table::<ObjectRecord>()?
            + self.warm_table::<AccountRecord>()?
            + self.warm_table::<ScriptRecord>()?
            + self.warm_table::<ChannelRecord>()?)
    }

    fn warm_table<R: Cached>(&mut self) -> Result<usize, WorldError> {
        let records: Vec<R> = self.stored()?;
        let cache = R::cache_mut(self);
        let before = cache.len();
        for record in records {
            cache.entry(record.id()).or_insert(record);
        }
        Ok(cache.len() - before)
    }

    pub fn create<R: Cached>(&mut self, mut record: R) -> Result<R::Id, WorldError> {
        let body = serde_json::to_value(&record)?;
        let raw = self.db.records().insert(
            R::TABLE,
            record.typeclass_path(),
            record.cmdset_storage(),
            &body,
        )?;
        record.assign_id(R::Id::from(raw));
        let id = record.id();
        R::cache_mut(self).insert(id, record);
        if self.initialized {
            self.run_hook_on::<R>(id, InstanceHook::AtInit)?;
        }
        tracing::debug!(kind = R::KIND, %id, "Instance created");
        Ok(id)
    }

    /// Cached instance, loading it from the store on a miss.
    pub fn get<R: Cached>(&mut self, id: R::Id) -> Result<Option<&R>, WorldError> {
        if !R::cache(self).contains_key(&id) {
            let Some(stored) = self.db.records().load(R::TABLE, id.into())? else {
                return Ok(None);
            };
            let record: R = Self::decode(stored)?;
            R::cache_mut(self).insert(id, record);
            if self.initialized {
                self.run_hook_on::<R>(id, InstanceHook::AtInit)?;
            }
        }
        Ok(R::cache(self).get(&id))
    }

    /// Cached instance without touching the store.
    pub fn cached<R: Cached>(&self, id: R::Id) -> Option<&R> {
        R::cache(self).get(&id)
    }

    pub fn cached_ids<R: Cached>(&self) -> Vec<R::Id> {
        R::cache(self).keys().copied().collect()
    }

    pub fn cached_count(&self) -> usize {
        self.objects.len() + self.accounts.len() + self.scripts.len() + self.channels.len()
    }

    /// Mutate an instance and write it through. Returns false if it does not exist.
    pub fn update<R: Cached>(&mut self, id: R::Id, f: impl FnOnce(&mut R)) -> Result<bool, WorldError> {
        if self.get::<R>(id)?.is_none() {
            return Ok(false);
        }
        let Some(record) = R::cache_mut(self).get_mut(&id) else {
            return Ok(false);
        };
        f(record);
        let snapshot = record.clone();
        self.persist(&snapshot)?;
        Ok(true)
    }

    pub fn delete<R: Cached>(&mut self, id: R::Id) -> Result<bool, WorldError> {
        R::cache_mut(self).remove(&id);
        let deleted = self.db.records().delete(R::TABLE, id.into())?;
        if deleted {
            tracing::debug!(kind = R::KIND, %id, "Instance deleted");
        }
        Ok(deleted)
    }

    /// Evict unpinned instances if more than `max_size` are cached.
    /// Returns the number evicted.
    pub fn conditional_flush(&mut self, max_size: usize) -> usize {
        let before = self.cached_count();
        if before <= max_size {
            return 0;
        }
        let evicted = self.evict_unpinned::<ObjectRecord>()
            + self.evict_unpinned::<AccountRecord>()
            + self.evict_unpinned::<ScriptRecord>()
            + self.evict_unpinned::<ChannelRecord>();
        tracing::info!(before, evicted, max_size, "Instance cache flushed");
        evicted
    }

    fn evict_unpinned<R: Cached>(&mut self) -> usize {
        let cache = R::cache_mut(self);
        let before = cache.len();
        cache.retain(|_, record| record.pinned());
        before - cache.len()
    }

    /// Discard the cached instances of `table` and reload them from the store.
    pub fn flush_instance_cache(&mut self, table: RecordTable) -> Result<(), WorldError> {
        match table {
            RecordTable::Objects => self.reload_cached::<ObjectRecord>(),
            RecordTable::Accounts => self.reload_cached::<AccountRecord>(),
            RecordTable::Scripts => self.reload_cached::<ScriptRecord>(),
            RecordTable::Channels => self.reload_cached::<ChannelRecord>(),
        }
    }

    pub fn flush_all_instance_caches(&mut self) -> Result<(), WorldError> {
        for table in [
            RecordTable::Objects,
            RecordTable::Accounts,
            RecordTable::Scripts,
            RecordTable::Channels,
        ] {
            self.flush_instance_cache(table)?;
        }
        Ok(())
    }

    fn reload_cached<R: Cached>(&mut self) -> Result<(), WorldError> {
        let ids = self.cached_ids::<R>();
        R::cache_mut(self).clear();
        for id in ids {
            if let Some(stored) = self.db.records().load(R::TABLE, id.into())? {
                let record: R = Self::decode(stored)?;
                R::cache_mut(self).insert(id, record);
            }
        }
        Ok(())
    }

    /// Rewrite a path column in the store. Cached instances keep the old
    /// value until their cache is flushed.
    pub fn bulk_update_path(
        &mut self,
        table: RecordTable,
        column: PathColumn,
        from: &str,
        to: &str,
    ) -> Result<usize, WorldError> {
        Ok(self.db.records().bulk_update(table, column, from, to)?)
    }

    // --- hooks ------------------------------------------------------------

    /// Run `hook` on every cached instance accepted by `filter`.
    ///
    /// A failing hook is logged and recorded; the rest of the batch still runs.
    pub fn call_hook<R: Cached>(
        &mut self,
        hook: InstanceHook,
        filter: impl Fn(&R) -> bool,
    ) -> Result<HookReport, WorldError> {
        let ids: Vec<R::Id> = R::cache(self)
            .values()
            .filter(|record| filter(record))
            .map(Record::id)
            .collect();

        let mut report = HookReport::default();
        for id in ids {
            report.invoked += 1;
            if let Some(failure) = self.run_hook_on::<R>(id, hook)? {
                report.failures.push(failure);
            }
        }
        Ok(report)
    }

    fn run_hook_on<R: Cached>(
        &mut self,
        id: R::Id,
        hook: InstanceHook,
    ) -> Result<Option<HookFailure>, WorldError> {
        let Some(path) = R::cache(self).get(&id).map(|r| r.typeclass_path().to_string()) else {
            return Ok(None);
        };
        let typeclass = self.typeclasses.resolve(&path);
        let Some(record) = R::cache_mut(self).get_mut(&id) else {
            return Ok(None);
        };

        let mut instance = record.instance();
        let outcome = hook.invoke(typeclass.as_ref(), &mut instance);
        let label = instance.label();
        let snapshot = record.clone();
        self.persist(&snapshot)?;

        match outcome {
            Ok(()) => Ok(None),
            Err(error) => {
                tracing::warn!(instance = %label, hook = hook.name(), error = %error, "Instance hook failed");
                Ok(Some(HookFailure {
                    instance: label,
                    hook: hook.name(),
                    error,
                }))
            }
        }
    }

    // --- puppeting --------------------------------------------------------

    /// Ids of every stored object carrying the puppeted tag.
    pub fn puppeted_objects(&self) -> Result<Vec<ObjectId>, WorldError> {
        Ok(self
            .db
            .records()
            .ids_with_tag(RecordTable::Objects, PUPPETED_TAG, Some(ACCOUNT_CATEGORY))?
            .into_iter()
            .map(ObjectId)
            .collect())
    }

    /// Link `account` to `object` from `session` and tag the object.
    pub fn puppet(
        &mut self,
        account: AccountId,
        object: ObjectId,
        session: SessionId,
    ) -> Result<(), WorldError> {
        let found = self.update::<ObjectRecord>(object, |obj| {
            obj.account = Some(account);
            if !obj.sessids.contains(&session) {
                obj.sessids.push(session);
            }
            obj.add_tag(Tag::puppeted());
        })?;
        if !found {
            return Err(WorldError::NotFound {
                kind: "object",
                id: object.0,
            });
        }
        self.update::<AccountRecord>(account, |acc| {
            if !acc.puppets.contains(&object) {
                acc.puppets.push(object);
            }
        })?;
        Ok(())
    }

    /// Undo a puppet link: `at_pre_unpuppet`, clear the link,
    /// `at_post_unpuppet(account, reason)`, then drop the puppeted tag.
    ///
    /// Hook failures are logged; the tag is cleared regardless.
    pub fn unpuppet(
        &mut self,
        object: ObjectId,
        account: Option<AccountId>,
        reason: &str,
    ) -> Result<bool, WorldError> {
        let Some(path) = self.get::<ObjectRecord>(object)?.map(|o| o.typeclass_path.clone()) else {
            return Ok(false);
        };
        let typeclass = self.typeclasses.resolve(&path);
        let Some(obj) = self.objects.get_mut(&object) else {
            return Ok(false);
        };

        if let Err(error) = typeclass.at_pre_unpuppet(obj) {
            tracing::warn!(%object, error = %error, "at_pre_unpuppet failed");
        }
        let previous = obj.account.take();
        obj.sessids.clear();
        if let Err(error) = typeclass.at_post_unpuppet(obj, account, reason) {
            tracing::warn!(%object, error = %error, "at_post_unpuppet failed");
        }
        obj.remove_tag(PUPPETED_TAG, Some(ACCOUNT_CATEGORY));
        let snapshot = obj.clone();
        self.persist(&snapshot)?;

        if let Some(owner) = account.or(previous) {
            self.update::<AccountRecord>(owner, |acc| acc.puppets.retain(|p| *p != object))?;
        }
        Ok(true)
    }

    /// Unpuppet everything `account` controls. Returns the count.
    pub fn unpuppet_all(&mut self, account: AccountId) -> Result<usize, WorldError> {
        let mut targets: Vec<ObjectId> = self
            .get::<AccountRecord>(account)?
            .map(|acc| acc.puppets.clone())
            .unwrap_or_default();
        for obj in self.objects.values() {
            if obj.account == Some(account) && !targets.contains(&obj.id) {
                targets.push(obj.id);
            }
        }

        let mut count = 0;
        for object in targets {
            if self.unpuppet(object, Some(account), "")? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Clear the stored session ids on every object. Returns how many changed.
    pub fn clear_all_sessids(&mut self) -> Result<usize, WorldError> {
        let stale: Vec<ObjectId> = self
            .stored::<ObjectRecord>()?
            .into_iter()
            .filter(|obj| !obj.sessids.is_empty())
            .map(|obj| obj.id)
            .collect();
        for id in &stale {
            self.update::<ObjectRecord>(*id, |obj| obj.sessids.clear())?;
        }
        Ok(stale.len())
    }

    // --- accounts ---------------------------------------------------------

    pub fn set_connected(&mut self, account: AccountId, connected: bool) -> Result<bool, WorldError> {
        self.update::<AccountRecord>(account, |acc| acc.is_connected = connected)
    }

    /// Permission check with superuser bypass. Unknown accounts hold nothing.
    pub fn account_has_permission(&mut self, account: AccountId, perm: &str) -> Result<bool, WorldError> {
        Ok(self
            .get::<AccountRecord>(account)?
            .is_some_and(|acc| acc.has_permission(perm)))
    }

    /// Delete every account of `guest_typeclass` together with its
    /// characters. Returns the number of accounts removed.
    pub fn delete_guest_accounts(&mut self, guest_typeclass: &str) -> Result<usize, WorldError> {
        let guests: Vec<AccountRecord> = self
            .stored::<AccountRecord>()?
            .into_iter()
            .filter(|acc| acc.typeclass_path == guest_typeclass)
            .collect();

        for guest in &guests {
            let mut owned = guest.characters.clone();
            owned.extend(guest.puppets.iter().copied());
            owned.sort();
            owned.dedup();
            for object in owned {
                self.delete::<ObjectRecord>(object)?;
            }
            self.delete::<AccountRecord>(guest.id)?;
            tracing::info!(account = %guest.id, username = %guest.username, "Guest account removed");
        }
        Ok(guests.len())
    }

    // --- scripts ----------------------------------------------------------

    /// Pause every active cached script. `auto` marks reload pauses.
    pub fn pause_active_scripts(&mut self, auto: bool) -> Result<usize, WorldError> {
        let active: Vec<ScriptId> = self
            .scripts
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.id)
            .collect();
        for id in &active {
            self.update::<ScriptRecord>(*id, |s| s.state = ScriptState::Paused { auto })?;
        }
        Ok(active.len())
    }

    /// Cold-stop the script table: non-persistent scripts are deleted,
    /// persistent ones end `Stopped`, flagged to restart if they were running.
    pub fn cold_stop_scripts(&mut self) -> Result<ScriptStopReport, WorldError> {
        let mut report = ScriptStopReport::default();
        for script in self.stored::<ScriptRecord>()? {
            if !script.persistent {
                self.delete::<ScriptRecord>(script.id)?;
                report.deleted += 1;
                continue;
            }
            if script.state == ScriptState::Stopped {
                continue;
            }
            // Scripts paused by game code stop without being restarted.
            let restart = matches!(script.state, ScriptState::Active | ScriptState::Paused { auto: true });
            self.update::<ScriptRecord>(script.id, |s| {
                s.state = ScriptState::Stopped;
                s.restart_on_start = restart;
            })?;
            report.stopped += 1;
        }
        Ok(report)
    }

    /// Delete every non-persistent script. Returns the count.
    pub fn delete_non_persistent_scripts(&mut self) -> Result<usize, WorldError> {
        let doomed: Vec<ScriptId> = self
            .stored::<ScriptRecord>()?
            .into_iter()
            .filter(|s| !s.persistent)
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            self.delete::<ScriptRecord>(*id)?;
        }
        Ok(doomed.len())
    }

    /// Bring scripts back after a start: auto-paused ones resume,
    /// cold-stopped persistent ones restart, dead non-persistent ones go.
    pub fn update_scripts_after_server_start(&mut self) -> Result<ScriptRestartReport, WorldError> {
        let mut report = ScriptRestartReport::default();
        for script in self.stored::<ScriptRecord>()? {
            match script.state {
                ScriptState::Paused { auto: true } => {
                    self.update::<ScriptRecord>(script.id, |s| s.state = ScriptState::Active)?;
                    report.resumed += 1;
                }
                ScriptState::Stopped if script.persistent && script.restart_on_start => {
                    self.update::<ScriptRecord>(script.id, |s| {
                        s.state = ScriptState::Active;
                        s.restart_on_start = false;
                    })?;
                    report.restarted += 1;
                }
                ScriptState::Stopped if !script.persistent => {
                    self.delete::<ScriptRecord>(script.id)?;
                    report.removed += 1;
                }
                _ => {}
            }
        }
        Ok(report)
    }

    // --- channels ---------------------------------------------------------

    /// Case-insensitive lookup by channel key.
    pub fn find_channel(&self, key: &str) -> Result<Option<ChannelId>, WorldError> {
        Ok(self
            .stored::<ChannelRecord>()?
            .into_iter()
            .find(|c| c.key.eq_ignore_ascii_case(key))
            .map(|c| c.id))
    }

    pub fn subscribe(&mut self, channel: ChannelId, account: AccountId) -> Result<bool, WorldError> {
        self.update::<ChannelRecord>(channel, |c| {
            if !c.subscribers.contains(&account) {
                c.subscribers.push(account);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeclass::{Instance, Typeclass};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
        fn push(&self, s: String) {
            self.calls.lock().unwrap().push(s);
        }
    }

    impl Typeclass for Recorder {
        fn at_init(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
            self.push(format!("at_init {}", instance.label()));
            Ok(())
        }
        fn at_server_shutdown(&self, instance: &mut Instance<'_>) -> Result<(), HookError> {
            if let Instance::Object(obj) = instance {
                if obj.key == "cursed" {
                    return Err(HookError::new("cursed"));
                }
            }
            self.push(format!("at_server_shutdown {}", instance.label()));
            Ok(())
        }
        fn at_pre_unpuppet(&self, object: &mut ObjectRecord) -> Result<(), HookError> {
            self.push(format!("pre {}", object.id));
            Ok(())
        }
        fn at_post_unpuppet(
            &self,
            object: &mut ObjectRecord,
            account: Option<AccountId>,
            reason: &str,
        ) -> Result<(), HookError> {
            self.push(format!("post {} {:?} {reason}", object.id, account));
            Ok(())
        }
    }

    fn world_with_recorder() -> (World, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut typeclasses = TypeclassRegistry::new();
        typeclasses.register("t.Char", recorder.clone());
        typeclasses.register("t.Account", recorder.clone());
        (World::new(Database::open_memory().unwrap(), typeclasses), recorder)
    }

    #[test]
    fn create_get_update_roundtrip_through_store() {
        let (mut world, _) = world_with_recorder();
        let id = world.create(ObjectRecord::new("Bob", "t.Char")).unwrap();
        assert_eq!(id, ObjectId(1));

        world.update::<ObjectRecord>(id, |o| o.key = "Robert".into()).unwrap();
        let evicted = world.conditional_flush(0);
        assert_eq!(evicted, 1);
        assert!(world.cached::<ObjectRecord>(id).is_none());

        let reloaded = world.get::<ObjectRecord>(id).unwrap().unwrap();
        assert_eq!(reloaded.key, "Robert");
        assert_eq!(reloaded.typeclass_path, "t.Char");
    }

    #[test]
    fn at_init_only_after_initialized() {
        let (mut world, recorder) = world_with_recorder();
        let a = world.create(ObjectRecord::new("a", "t.Char")).unwrap();
        assert!(recorder.calls().is_empty());

        world.mark_initialized();
        world.conditional_flush(0);
        world.get::<ObjectRecord>(a).unwrap();
        world.create(ObjectRecord::new("b", "t.Char")).unwrap();
        assert_eq!(recorder.calls(), vec!["at_init object #1", "at_init object #2"]);
    }

    #[test]
    fn hook_failures_are_isolated() {
        let (mut world, recorder) = world_with_recorder();
        world.create(ObjectRecord::new("fine", "t.Char")).unwrap();
        world.create(ObjectRecord::new("cursed", "t.Char")).unwrap();
        world.create(ObjectRecord::new("also fine", "t.Char")).unwrap();

        let report = world
            .call_hook::<ObjectRecord>(InstanceHook::AtServerShutdown, |_| true)
            .unwrap();
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].instance, "object #2");
        assert_eq!(recorder.calls().len(), 2);
    }

    #[test]
    fn conditional_flush_keeps_pinned_and_respects_budget() {
        let (mut world, _) = world_with_recorder();
        let acc = world.create(AccountRecord::new("p", "t.Account")).unwrap();
        let puppet = world.create(ObjectRecord::new("p-char", "t.Char")).unwrap();
        world.create(ObjectRecord::new("rock", "t.Char")).unwrap();
        world.puppet(acc, puppet, SessionId(1)).unwrap();

        assert_eq!(world.conditional_flush(10), 0);
        assert_eq!(world.conditional_flush(1), 2);
        assert!(world.cached::<ObjectRecord>(puppet).is_some());
    }

    #[test]
    fn unpuppet_clears_tag_and_links_once() {
        let (mut world, recorder) = world_with_recorder();
        let acc = world.create(AccountRecord::new("p", "t.Account")).unwrap();
        let obj = world.create(ObjectRecord::new("c", "t.Char")).unwrap();
        world.puppet(acc, obj, SessionId(9)).unwrap();
        assert_eq!(world.puppeted_objects().unwrap(), vec![obj]);

        assert!(world.unpuppet(obj, None, " (connection lost)").unwrap());
        assert!(world.puppeted_objects().unwrap().is_empty());
        let stored = world.get::<ObjectRecord>(obj).unwrap().unwrap();
        assert!(stored.account.is_none());
        assert!(stored.sessids.is_empty());
        assert!(world.get::<AccountRecord>(acc).unwrap().unwrap().puppets.is_empty());
        assert_eq!(
            recorder.calls(),
            vec!["pre #1".to_string(), "post #1 None  (connection lost)".to_string()]
        );
    }

    #[test]
    fn bulk_update_is_visible_after_flush() {
        let (mut world, _) = world_with_recorder();
        let id = world.create(ObjectRecord::new("Limbo", "old.Room")).unwrap();
        let n = world
            .bulk_update_path(RecordTable::Objects, PathColumn::TypeclassPath, "old.Room", "new.Room")
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(world.cached::<ObjectRecord>(id).unwrap().typeclass_path, "old.Room");

        world.flush_all_instance_caches().unwrap();
        assert_eq!(world.cached::<ObjectRecord>(id).unwrap().typeclass_path, "new.Room");
    }

    #[test]
    fn script_cold_stop_and_restart_cycle() {
        let (mut world, _) = world_with_recorder();
        let keep = world.create(ScriptRecord::new("weather", "s.Weather", true)).unwrap();
        world.create(ScriptRecord::new("temp", "s.Temp", false)).unwrap();

        let stop = world.cold_stop_scripts().unwrap();
        assert_eq!(stop, ScriptStopReport { stopped: 1, deleted: 1 });
        let kept = world.get::<ScriptRecord>(keep).unwrap().unwrap();
        assert_eq!(kept.state, ScriptState::Stopped);
        assert!(kept.restart_on_start);

        let restart = world.update_scripts_after_server_start().unwrap();
        assert_eq!(restart.restarted, 1);
        assert!(world.get::<ScriptRecord>(keep).unwrap().unwrap().is_active());
    }

    #[test]
    fn auto_paused_scripts_resume() {
        let (mut world, _) = world_with_recorder();
        let id = world.create(ScriptRecord::new("weather", "s.Weather", true)).unwrap();
        assert_eq!(world.pause_active_scripts(true).unwrap(), 1);
        assert_eq!(
            world.get::<ScriptRecord>(id).unwrap().unwrap().state,
            ScriptState::Paused { auto: true }
        );
        let report = world.update_scripts_after_server_start().unwrap();
        assert_eq!(report.resumed, 1);
    }

    #[test]
    fn guests_are_removed_with_characters() {
        let (mut world, _) = world_with_recorder();
        let char_id = world.create(ObjectRecord::new("Guest1", "t.Char")).unwrap();
        let mut guest = AccountRecord::new("Guest1", "t.Guest");
        guest.characters.push(char_id);
        world.create(guest).unwrap();
        let regular = world.create(AccountRecord::new("alice", "t.Account")).unwrap();

        assert_eq!(world.delete_guest_accounts("t.Guest").unwrap(), 1);
        assert!(world.get::<ObjectRecord>(char_id).unwrap().is_none());
        assert!(world.get::<AccountRecord>(regular).unwrap().is_some());
    }

    #[test]
    fn clear_all_sessids_touches_only_stale_objects() {
        let (mut world, _) = world_with_recorder();
        let acc = world.create(AccountRecord::new("p", "t.Account")).unwrap();
        let a = world.create(ObjectRecord::new("a", "t.Char")).unwrap();
        world.create(ObjectRecord::new("b", "t.Char")).unwrap();
        world.puppet(acc, a, SessionId(3)).unwrap();

        assert_eq!(world.clear_all_sessids().unwrap(), 1);
        assert!(world.get::<ObjectRecord>(a).unwrap().unwrap().sessids.is_empty());
        assert_eq!(world.clear_all_sessids().unwrap(), 0);
    }

    #[test]
    fn channels_lookup_and_subscribe() {
        let (mut world, _) = world_with_recorder();
        let acc = world.create(AccountRecord::new("admin", "t.Account")).unwrap();
        let chan = world
            .create(ChannelRecord::new("MudInfo", "c.Channel").with_description("info"))
            .unwrap();
        assert_eq!(world.find_channel("mudinfo").unwrap(), Some(chan));
        assert!(world.find_channel("public").unwrap().is_none());

        world.subscribe(chan, acc).unwrap();
        world.subscribe(chan, acc).unwrap();
        assert_eq!(world.get::<ChannelRecord>(chan).unwrap().unwrap().subscribers, vec![acc]);
    }
}
