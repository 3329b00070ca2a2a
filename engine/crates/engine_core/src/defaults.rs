use std::collections::BTreeMap;

use persistence::{ConfigStore, PathColumn, RecordTable};
use world::World;

use crate::error::LifecycleError;

/// One reconciled default: the setting name and the stored column it
/// rewrites when the configured value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultSetting {
    pub name: &'static str,
    pub table: RecordTable,
    pub column: PathColumn,
    pub fallback: &'static str,
}

const fn setting(
    name: &'static str,
    table: RecordTable,
    column: PathColumn,
    fallback: &'static str,
) -> DefaultSetting {
    DefaultSetting {
        name,
        table,
        column,
        fallback,
    }
}

pub const DEFAULT_SETTINGS: [DefaultSetting; 9] = [
    setting(
        "CMDSET_CHARACTER",
        RecordTable::Objects,
        PathColumn::CmdsetStorage,
        "commands.default_cmdsets.CharacterCmdSet",
    ),
    setting(
        "CMDSET_ACCOUNT",
        RecordTable::Accounts,
        PathColumn::CmdsetStorage,
        "commands.default_cmdsets.AccountCmdSet",
    ),
    setting(
        "BASE_ACCOUNT_TYPECLASS",
        RecordTable::Accounts,
        PathColumn::TypeclassPath,
        "typeclasses.accounts.Account",
    ),
    setting(
        "BASE_OBJECT_TYPECLASS",
        RecordTable::Objects,
        PathColumn::TypeclassPath,
        "typeclasses.objects.Object",
    ),
    setting(
        "BASE_CHARACTER_TYPECLASS",
        RecordTable::Objects,
        PathColumn::TypeclassPath,
        "typeclasses.characters.Character",
    ),
    setting(
        "BASE_ROOM_TYPECLASS",
        RecordTable::Objects,
        PathColumn::TypeclassPath,
        "typeclasses.rooms.Room",
    ),
    setting(
        "BASE_EXIT_TYPECLASS",
        RecordTable::Objects,
        PathColumn::TypeclassPath,
        "typeclasses.exits.Exit",
    ),
    setting(
        "BASE_SCRIPT_TYPECLASS",
        RecordTable::Scripts,
        PathColumn::TypeclassPath,
        "typeclasses.scripts.Script",
    ),
    setting(
        "BASE_CHANNEL_TYPECLASS",
        RecordTable::Channels,
        PathColumn::TypeclassPath,
        "typeclasses.channels.Channel",
    ),
];

/// The configured value of every reconciled default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeclassDefaults {
    values: BTreeMap<&'static str, String>,
}

impl Default for TypeclassDefaults {
    fn default() -> Self {
        Self {
            values: DEFAULT_SETTINGS
                .iter()
                .map(|s| (s.name, s.fallback.to_string()))
                .collect(),
        }
    }
}

impl TypeclassDefaults {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Override one default. Unknown names are rejected.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), LifecycleError> {
        let Some(known) = DEFAULT_SETTINGS.iter().find(|s| s.name == name) else {
            return Err(LifecycleError::Config(format!("unknown typeclass default '{name}'")));
        };
        self.values.insert(known.name, value.into());
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Settings seen for the first time and stored.
    pub first_seen: Vec<&'static str>,
    /// (setting, previous, current, rows rewritten)
    pub changed: Vec<(&'static str, String, String, usize)>,
}

/// Compare configured defaults with the values stored on the last start.
///
/// A changed default rewrites every stored record still using the old path,
/// then every instance cache is dropped so no stale definition survives.
pub fn reconcile_defaults(
    store: &mut dyn ConfigStore,
    world: &mut World,
    current: &TypeclassDefaults,
) -> Result<ReconcileReport, LifecycleError> {
    let mut report = ReconcileReport::default();

    for def in DEFAULT_SETTINGS.iter() {
        let Some(curr) = current.get(def.name).filter(|v| !v.is_empty()) else {
            continue;
        };
        let previous = store
            .get(def.name)?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|v| !v.is_empty());

        match previous {
            None => {
                store.set(def.name, serde_json::json!(curr))?;
                report.first_seen.push(def.name);
            }
            Some(prev) if prev != curr => {
                let rows = world.bulk_update_path(def.table, def.column, &prev, curr)?;
                tracing::info!(
                    setting = def.name,
                    from = %prev,
                    to = curr,
                    rows,
                    "Typeclass default changed, stored entries updated"
                );
                store.set(def.name, serde_json::json!(curr))?;
                report.changed.push((def.name, prev, curr.to_string(), rows));
            }
            Some(_) => {}
        }
    }

    if !report.changed.is_empty() {
        world.flush_all_instance_caches()?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::{Database, MemoryConfigStore};
    use world::{AccountRecord, ObjectRecord, TypeclassRegistry};

    fn world() -> World {
        World::new(Database::open_memory().unwrap(), TypeclassRegistry::new())
    }

    #[test]
    fn first_start_stores_every_default() {
        let mut store = MemoryConfigStore::new();
        let mut world = world();
        let report = reconcile_defaults(&mut store, &mut world, &TypeclassDefaults::default()).unwrap();
        assert_eq!(report.first_seen.len(), DEFAULT_SETTINGS.len());
        assert!(report.changed.is_empty());
        assert_eq!(
            store.get("BASE_ROOM_TYPECLASS").unwrap(),
            Some(serde_json::json!("typeclasses.rooms.Room"))
        );

        let again = reconcile_defaults(&mut store, &mut world, &TypeclassDefaults::default()).unwrap();
        assert_eq!(again, ReconcileReport::default());
    }

    #[test]
    fn changed_default_rewrites_records_and_flushes() {
        let mut store = MemoryConfigStore::new();
        let mut world = world();
        reconcile_defaults(&mut store, &mut world, &TypeclassDefaults::default()).unwrap();

        let old = world
            .create(ObjectRecord::new("box", "typeclasses.objects.Object"))
            .unwrap();
        let custom = world
            .create(ObjectRecord::new("orb", "typeclasses.magic.Orb"))
            .unwrap();
        let acc = world
            .create(AccountRecord::new("dave", "typeclasses.accounts.Account"))
            .unwrap();

        let mut current = TypeclassDefaults::default();
        current.set("BASE_OBJECT_TYPECLASS", "game.objects.Thing").unwrap();
        let report = reconcile_defaults(&mut store, &mut world, &current).unwrap();

        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.changed[0].0, "BASE_OBJECT_TYPECLASS");
        assert_eq!(report.changed[0].3, 1);
        assert_eq!(
            world.cached::<ObjectRecord>(old).map(|o| o.typeclass_path.as_str()),
            Some("game.objects.Thing")
        );
        assert_eq!(
            world.cached::<ObjectRecord>(custom).map(|o| o.typeclass_path.as_str()),
            Some("typeclasses.magic.Orb")
        );
        assert_eq!(
            world.cached::<AccountRecord>(acc).map(|a| a.typeclass_path.as_str()),
            Some("typeclasses.accounts.Account")
        );
        assert_eq!(
            store.get("BASE_OBJECT_TYPECLASS").unwrap(),
            Some(serde_json::json!("game.objects.Thing"))
        );
    }

    #[test]
    fn cmdset_default_targets_cmdset_column() {
        let mut store = MemoryConfigStore::new();
        let mut world = world();
        reconcile_defaults(&mut store, &mut world, &TypeclassDefaults::default()).unwrap();
        let id = world
            .create(
                ObjectRecord::new("hero", "typeclasses.characters.Character")
                    .with_cmdset("commands.default_cmdsets.CharacterCmdSet"),
            )
            .unwrap();

        let mut current = TypeclassDefaults::default();
        current.set("CMDSET_CHARACTER", "game.cmdsets.Hero").unwrap();
        reconcile_defaults(&mut store, &mut world, &current).unwrap();

        let hero = world.cached::<ObjectRecord>(id).unwrap();
        assert_eq!(hero.cmdset_storage.as_deref(), Some("game.cmdsets.Hero"));
        assert_eq!(hero.typeclass_path, "typeclasses.characters.Character");
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut defaults = TypeclassDefaults::default();
        assert!(defaults.set("BASE_WIDGET_TYPECLASS", "x").is_err());
    }
}
