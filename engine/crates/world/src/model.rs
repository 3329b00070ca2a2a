use persistence::RecordTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ChannelId, ObjectId, ScriptId, SessionId};
use crate::typeclass::Instance;

/// Tag key set on an object while an account puppets it.
pub const PUPPETED_TAG: &str = "puppeted";
/// Category of the [`PUPPETED_TAG`].
pub const ACCOUNT_CATEGORY: &str = "account";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub category: Option<String>,
}

impl Tag {
    pub fn new(key: impl Into<String>, category: Option<&str>) -> Self {
        Self {
            key: key.into(),
            category: category.map(str::to_string),
        }
    }

    pub fn puppeted() -> Self {
        Self::new(PUPPETED_TAG, Some(ACCOUNT_CATEGORY))
    }

    fn matches(&self, key: &str, category: Option<&str>) -> bool {
        self.key == key && self.category.as_deref() == category
    }
}

/// A persisted row type held in the instance cache.
///
/// The record body is the serde form of the whole struct; the typeclass
/// path and cmdset columns are authoritative and overwrite the body copy
/// on load.
pub trait Record: Clone + Serialize + DeserializeOwned + 'static {
    type Id: Copy + Ord + std::fmt::Display + std::fmt::Debug + From<i64> + Into<i64>;

    const TABLE: RecordTable;
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
    fn assign_id(&mut self, id: Self::Id);
    fn typeclass_path(&self) -> &str;
    fn cmdset_storage(&self) -> Option<&str> {
        None
    }
    fn set_columns(&mut self, typeclass_path: String, cmdset_storage: Option<String>);

    /// Evicting a pinned instance would drop live state, so flushes skip it.
    fn pinned(&self) -> bool {
        false
    }

    fn instance(&mut self) -> Instance<'_>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub key: String,
    pub typeclass_path: String,
    #[serde(default)]
    pub cmdset_storage: Option<String>,
    #[serde(default)]
    pub location: Option<ObjectId>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Account currently controlling this object.
    #[serde(default)]
    pub account: Option<AccountId>,
    /// Sessions the object was last puppeted from.
    #[serde(default)]
    pub sessids: Vec<SessionId>,
}

impl ObjectRecord {
    pub fn new(key: impl Into<String>, typeclass_path: impl Into<String>) -> Self {
        Self {
            id: ObjectId(0),
            key: key.into(),
            typeclass_path: typeclass_path.into(),
            cmdset_storage: None,
            location: None,
            tags: Vec::new(),
            account: None,
            sessids: Vec::new(),
        }
    }

    pub fn with_cmdset(mut self, cmdset: impl Into<String>) -> Self {
        self.cmdset_storage = Some(cmdset.into());
        self
    }

    pub fn with_location(mut self, location: ObjectId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn has_tag(&self, key: &str, category: Option<&str>) -> bool {
        self.tags.iter().any(|t| t.matches(key, category))
    }

    pub fn add_tag(&mut self, tag: Tag) {
        if !self.has_tag(&tag.key, tag.category.as_deref()) {
            self.tags.push(tag);
        }
    }

    /// Returns true if a tag was removed.
    pub fn remove_tag(&mut self, key: &str, category: Option<&str>) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| !t.matches(key, category));
        self.tags.len() != before
    }

    pub fn is_puppeted(&self) -> bool {
        self.has_tag(PUPPETED_TAG, Some(ACCOUNT_CATEGORY))
    }
}

impl Record for ObjectRecord {
    type Id = ObjectId;
    const TABLE: RecordTable = RecordTable::Objects;
    const KIND: &'static str = "object";

    fn id(&self) -> ObjectId {
        self.id
    }
    fn assign_id(&mut self, id: ObjectId) {
        self.id = id;
    }
    fn typeclass_path(&self) -> &str {
        &self.typeclass_path
    }
    fn cmdset_storage(&self) -> Option<&str> {
        self.cmdset_storage.as_deref()
    }
    fn set_columns(&mut self, typeclass_path: String, cmdset_storage: Option<String>) {
        self.typeclass_path = typeclass_path;
        self.cmdset_storage = cmdset_storage;
    }
    fn pinned(&self) -> bool {
        self.account.is_some() || !self.sessids.is_empty()
    }
    fn instance(&mut self) -> Instance<'_> {
        Instance::Object(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub username: String,
    pub typeclass_path: String,
    #[serde(default)]
    pub cmdset_storage: Option<String>,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Objects this account is puppeting right now.
    #[serde(default)]
    pub puppets: Vec<ObjectId>,
    #[serde(default)]
    pub characters: Vec<ObjectId>,
}

impl AccountRecord {
    pub fn new(username: impl Into<String>, typeclass_path: impl Into<String>) -> Self {
        Self {
            id: AccountId(0),
            username: username.into(),
            typeclass_path: typeclass_path.into(),
            cmdset_storage: None,
            is_connected: false,
            is_superuser: false,
            permissions: Vec::new(),
            puppets: Vec::new(),
            characters: Vec::new(),
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn with_permission(mut self, perm: impl Into<String>) -> Self {
        self.permissions.push(perm.into());
        self
    }

    /// Superusers pass every check.
    pub fn has_permission(&self, perm: &str) -> bool {
        self.is_superuser || self.permissions.iter().any(|p| p.eq_ignore_ascii_case(perm))
    }
}

impl Record for AccountRecord {
    type Id = AccountId;
    const TABLE: RecordTable = RecordTable::Accounts;
    const KIND: &'static str = "account";

    fn id(&self) -> AccountId {
        self.id
    }
    fn assign_id(&mut self, id: AccountId) {
        self.id = id;
    }
    fn typeclass_path(&self) -> &str {
        &self.typeclass_path
    }
    fn cmdset_storage(&self) -> Option<&str> {
        self.cmdset_storage.as_deref()
    }
    fn set_columns(&mut self, typeclass_path: String, cmdset_storage: Option<String>) {
        self.typeclass_path = typeclass_path;
        self.cmdset_storage = cmdset_storage;
    }
    fn pinned(&self) -> bool {
        self.is_connected
    }
    fn instance(&mut self) -> Instance<'_> {
        Instance::Account(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptState {
    Active,
    /// `auto` marks a pause made by a reload rather than by game code.
    Paused { auto: bool },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: ScriptId,
    pub key: String,
    pub typeclass_path: String,
    pub persistent: bool,
    pub state: ScriptState,
    /// Set by a cold stop on persistent scripts that should start again.
    #[serde(default)]
    pub restart_on_start: bool,
    #[serde(default)]
    pub obj: Option<ObjectId>,
}

impl ScriptRecord {
    pub fn new(key: impl Into<String>, typeclass_path: impl Into<String>, persistent: bool) -> Self {
        Self {
            id: ScriptId(0),
            key: key.into(),
            typeclass_path: typeclass_path.into(),
            persistent,
            state: ScriptState::Active,
            restart_on_start: false,
            obj: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ScriptState::Active
    }
}

impl Record for ScriptRecord {
    type Id = ScriptId;
    const TABLE: RecordTable = RecordTable::Scripts;
    const KIND: &'static str = "script";

    fn id(&self) -> ScriptId {
        self.id
    }
    fn assign_id(&mut self, id: ScriptId) {
        self.id = id;
    }
    fn typeclass_path(&self) -> &str {
        &self.typeclass_path
    }
    fn set_columns(&mut self, typeclass_path: String, _cmdset_storage: Option<String>) {
        self.typeclass_path = typeclass_path;
    }
    fn pinned(&self) -> bool {
        self.is_active()
    }
    fn instance(&mut self) -> Instance<'_> {
        Instance::Script(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub key: String,
    pub typeclass_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subscribers: Vec<AccountId>,
}

impl ChannelRecord {
    pub fn new(key: impl Into<String>, typeclass_path: impl Into<String>) -> Self {
        Self {
            id: ChannelId(0),
            key: key.into(),
            typeclass_path: typeclass_path.into(),
            description: String::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Record for ChannelRecord {
    type Id = ChannelId;
    const TABLE: RecordTable = RecordTable::Channels;
    const KIND: &'static str = "channel";

    fn id(&self) -> ChannelId {
        self.id
    }
    fn assign_id(&mut self, id: ChannelId) {
        self.id = id;
    }
    fn typeclass_path(&self) -> &str {
        &self.typeclass_path
    }
    fn set_columns(&mut self, typeclass_path: String, _cmdset_storage: Option<String>) {
        self.typeclass_path = typeclass_path;
    }
    fn pinned(&self) -> bool {
        true
    }
    fn instance(&mut self) -> Instance<'_> {
        Instance::Channel(self)
    }
}
