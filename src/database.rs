//! Decrypted vault model
//!
//! A vault is made up of two primary parts, a set of meta information
//! about the database itself, like the name or the recycle bin location,
//! and a tree of groups holding password entries. Groups can be nested
//! within other groups.
//!
//! Secret field values are held as [`ProtectedValue`]s and only
//! materialised on explicit read. The read-only [`EntryView`] /
//! [`GroupView`] shapes are what leaves the keeper; they expose cleartext
//! because their consumers sit inside the trust boundary once the session
//! is unlocked.
//!
//! ## Example operations
//!
//! ### Add an entry to the root group
//!
//! ```
//! # use kdbx_keeper::database::{Vault, Entry};
//! let mut vault = Vault::new("Personal");
//! let entry = Entry::default();
//! vault.add_entry(entry);
//! ```

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::protected::ProtectedValue;

/// Field key for an entry title
pub const FIELD_TITLE: &str = "Title";
/// Field key for an entry username
pub const FIELD_USERNAME: &str = "UserName";
/// Field key for an entry password
pub const FIELD_PASSWORD: &str = "Password";
/// Field key for an entry URL
pub const FIELD_URL: &str = "URL";
/// Field key for entry notes
pub const FIELD_NOTES: &str = "Notes";

const RECYCLE_BIN_NAME: &str = "Recycle Bin";

/// A value for a `Field` stored in an `Entry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    /// A value masked in memory
    Protected(ProtectedValue),
    /// A value held cleartext in memory
    Standard(String),
    /// A empty value
    Empty,
    /// A empty value that should be protected if filled
    ProtectEmpty,
}

impl Default for Value {
    fn default() -> Value {
        Value::Empty
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// A key value pair
pub struct Field {
    /// The name of this field
    pub(crate) key: String,
    /// The (optionally masked) value of this field
    pub(crate) value: Value,
}

impl Field {
    /// Create a new field without memory protection
    pub fn new(key: &str, value: &str) -> Field {
        Field {
            key: key.to_string(),
            value: Value::Standard(value.to_string()),
        }
    }

    /// Create a new field with memory protection
    pub fn new_protected(key: &str, value: &str) -> Field {
        Field {
            key: key.to_string(),
            value: Value::Protected(ProtectedValue::wrap(value)),
        }
    }

    /// Key for this field
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cleartext value for unprotected fields.
    ///
    /// Returns `None` for protected or empty fields - use [`Field::reveal`]
    /// to materialise a protected value.
    pub fn standard_value(&self) -> Option<&str> {
        match self.value {
            Value::Standard(ref s) => Some(s),
            _ => None,
        }
    }

    /// Materialise the value of this field, whether protected or not.
    ///
    /// The returned buffer is zeroed on drop.
    pub fn reveal(&self) -> Option<Zeroizing<String>> {
        match self.value {
            Value::Protected(ref v) => Some(v.reveal()),
            Value::Standard(ref s) => Some(Zeroizing::new(s.clone())),
            _ => None,
        }
    }

    /// Set a new value for this field, keeping its protection mode
    pub fn set_value(&mut self, value: &str) {
        if self.protected() {
            self.value = Value::Protected(ProtectedValue::wrap(value));
        } else {
            self.value = Value::Standard(value.to_string());
        }
    }

    /// Get whether this field is masked in memory and marked protected
    /// in the serialized database
    pub fn protected(&self) -> bool {
        matches!(self.value, Value::Protected(_) | Value::ProtectEmpty)
    }
}

/// Historical versions of a single entry
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct History {
    entries: Vec<Entry>,
}

impl History {
    /// Get a history entry by its index
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Add a new version of an entry to the history
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Count of entries in this history
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this history is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all historical entries
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single password entry
pub struct Entry {
    /// Identifier for this entry
    uuid: Uuid,
    /// Key-value pairs of current data for this entry
    fields: Vec<Field>,
    /// Free-form labels attached to this entry
    pub(crate) tags: Vec<String>,
    /// Previous versions of this entry
    pub(crate) history: History,
    /// Information about access times
    pub(crate) times: Times,
}

impl Entry {
    /// Add a new field to the entry
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Snapshot the current state of this entry into its history.
    ///
    /// Call before overwriting fields so the prior version stays
    /// recoverable. The snapshot itself carries no nested history.
    pub fn push_history(&mut self) {
        let mut snapshot = self.clone();
        snapshot.history = History::default();
        self.history.push(snapshot);
    }

    /// Iterate through all the fields
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// History for this entry
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Find a field in this entry with a given key
    pub fn find(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|i| i.key.as_str() == key)
    }

    /// Find a field in this entry with a given key
    pub fn find_mut(&mut self, key: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|i| i.key.as_str() == key)
    }

    /// Materialise the value of a field by key
    pub fn get_field(&self, key: &str) -> Option<Zeroizing<String>> {
        self.find(key).and_then(|f| f.reveal())
    }

    /// Set a field to a cleartext value, creating it if absent
    pub fn set_field(&mut self, key: &str, value: &str) {
        match self.find_mut(key) {
            Some(f) => f.value = Value::Standard(value.to_string()),
            None => self.fields.push(Field::new(key, value)),
        }
    }

    /// Set a field to a masked value, creating it if absent
    pub fn set_protected_field(&mut self, key: &str, value: &str) {
        match self.find_mut(key) {
            Some(f) => f.value = Value::Protected(ProtectedValue::wrap(value)),
            None => self.fields.push(Field::new_protected(key, value)),
        }
    }

    /// Audit times for this entry
    pub fn times(&self) -> &Times {
        &self.times
    }

    /// Mutable audit times for this entry
    pub fn times_mut(&mut self) -> &mut Times {
        &mut self.times
    }

    /// Labels attached to this entry
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Replace the labels attached to this entry
    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    /// Identifier for this entry
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Set the identifier for this entry
    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = uuid;
    }

    fn find_string_value(&self, key: &str) -> Option<&str> {
        self.find(key).and_then(|f| f.standard_value())
    }

    /// Return the title of this entry
    pub fn title(&self) -> Option<&str> {
        self.find_string_value(FIELD_TITLE)
    }

    /// Set the title of this entry
    pub fn set_title<S: ToString>(&mut self, title: S) {
        self.set_field(FIELD_TITLE, &title.to_string());
    }

    /// Return the username of this entry
    pub fn username(&self) -> Option<&str> {
        self.find_string_value(FIELD_USERNAME)
    }

    /// Set the username of this entry
    pub fn set_username<S: ToString>(&mut self, username: S) {
        self.set_field(FIELD_USERNAME, &username.to_string());
    }

    /// Return the URL of this entry
    pub fn url(&self) -> Option<&str> {
        self.find_string_value(FIELD_URL)
    }

    /// Set the URL of this entry
    pub fn set_url<S: ToString>(&mut self, url: S) {
        self.set_field(FIELD_URL, &url.to_string());
    }

    /// Return the notes of this entry
    pub fn notes(&self) -> Option<&str> {
        self.find_string_value(FIELD_NOTES)
    }

    /// Set the notes of this entry
    pub fn set_notes<S: ToString>(&mut self, notes: S) {
        self.set_field(FIELD_NOTES, &notes.to_string());
    }

    /// Materialise the password of this entry
    pub fn password(&self) -> Option<Zeroizing<String>> {
        self.get_field(FIELD_PASSWORD)
    }

    /// Set the password of this entry, masked in memory
    pub fn set_password<S: ToString>(&mut self, password: S) {
        self.set_protected_field(FIELD_PASSWORD, &password.to_string());
    }
}

impl Default for Entry {
    fn default() -> Entry {
        Entry {
            uuid: Uuid::new_v4(),
            fields: Vec::new(),
            tags: Vec::new(),
            history: History::default(),
            times: Times::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A group or folder of password entries and child groups
pub struct Group {
    /// Identifier for this group
    uuid: Uuid,
    /// Name of this group
    name: String,
    /// Display icon index for this group
    pub(crate) icon_id: u32,
    /// Password items within this group
    entries: Vec<Entry>,
    /// Subfolders of this group
    groups: Vec<Group>,
    /// Access times for this group
    pub(crate) times: Times,
}

impl Group {
    /// Create a new group with the given name
    pub fn new<S: ToString>(name: S) -> Group {
        Group {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            icon_id: 0,
            entries: Vec::new(),
            groups: Vec::new(),
            times: Times::default(),
        }
    }

    /// Identifier for this group
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Set identifier for this group
    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = uuid
    }

    /// Display name for this group
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set display name for this group
    pub fn set_name<S: ToString>(&mut self, name: S) {
        self.name = name.to_string();
    }

    /// Display icon index for this group
    pub fn icon_id(&self) -> u32 {
        self.icon_id
    }

    /// Add a new entry to this group
    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Remove an entry by its UUID
    ///
    /// This is a no-op if no direct child of this group has the given UUID
    pub fn remove_entry(&mut self, uuid: Uuid) -> Option<Entry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.uuid() == uuid)?;
        Some(self.entries.remove(index))
    }

    /// Add a new child group to this group
    pub fn add_group(&mut self, group: Group) {
        self.groups.push(group);
    }

    /// Iterate through all the direct child groups of this group
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    /// Iterate mutably through all the direct child groups of this group
    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut Group> {
        self.groups.iter_mut()
    }

    /// Count of direct entries of this group
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Iterate through all the direct entries of this group
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Iterate mutably through all the direct entries of this group
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut()
    }

    /// Find a group in this group's subtree by a filter
    pub fn find_group<F: FnMut(&Group) -> bool>(&self, mut f: F) -> Option<&Group> {
        self.find_group_internal(&mut f)
    }

    fn find_group_internal<F: FnMut(&Group) -> bool>(&self, f: &mut F) -> Option<&Group> {
        for group in self.groups() {
            if f(group) {
                return Some(group);
            } else if let Some(g) = group.find_group_internal(f) {
                return Some(g);
            }
        }
        None
    }

    /// Find a mutable group in this group's subtree by a filter
    pub fn find_group_mut<F: FnMut(&Group) -> bool>(&mut self, mut f: F) -> Option<&mut Group> {
        self.find_group_mut_internal(&mut f)
    }

    fn find_group_mut_internal<F: FnMut(&Group) -> bool>(
        &mut self,
        f: &mut F,
    ) -> Option<&mut Group> {
        for group in self.groups_mut() {
            if f(group) {
                return Some(group);
            } else if let Some(g) = group.find_group_mut_internal(f) {
                return Some(g);
            }
        }
        None
    }

    /// Find a entry in this group's subtree by a filter
    pub fn find_entry<F: FnMut(&Entry) -> bool>(&self, mut f: F) -> Option<&Entry> {
        self.find_entry_internal(&mut f)
    }

    fn find_entry_internal<F: FnMut(&Entry) -> bool>(&self, f: &mut F) -> Option<&Entry> {
        for entry in self.entries() {
            if f(entry) {
                return Some(entry);
            }
        }
        for group in self.groups() {
            if let Some(e) = group.find_entry_internal(f) {
                return Some(e);
            }
        }
        None
    }

    /// Find a mutable entry in this group's subtree by a filter
    pub fn find_entry_mut<F: FnMut(&Entry) -> bool>(&mut self, mut f: F) -> Option<&mut Entry> {
        self.find_entry_mut_internal(&mut f)
    }

    fn find_entry_mut_internal<F: FnMut(&Entry) -> bool>(
        &mut self,
        f: &mut F,
    ) -> Option<&mut Entry> {
        let found_in_entries = self.entries.iter().position(|e| f(e));

        if let Some(idx) = found_in_entries {
            return Some(&mut self.entries[idx]);
        }
        for group in self.groups_mut() {
            if let Some(e) = group.find_entry_mut_internal(f) {
                return Some(e);
            }
        }
        None
    }

    /// Audit times for this group
    pub fn times(&self) -> &Times {
        &self.times
    }
}

impl Default for Group {
    fn default() -> Group {
        Group::new("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Identifies which fields are masked in memory and marked protected
/// in the serialized database
pub struct MemoryProtection {
    /// Whether title fields should be protected
    pub protect_title: bool,
    /// Whether username fields should be protected
    pub protect_user_name: bool,
    /// Whether password fields should be protected
    pub protect_password: bool,
    /// Whether URL fields should be protected
    pub protect_url: bool,
    /// Whether Notes fields should be protected
    pub protect_notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> MemoryProtection {
        MemoryProtection {
            protect_title: false,
            protect_user_name: false,
            protect_password: true,
            protect_url: false,
            protect_notes: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// Meta information about this vault
pub struct Meta {
    /// Application used to generate this database
    pub generator: String,
    /// Short name for the database
    pub database_name: String,
    /// Longer description of the database
    pub database_description: String,
    /// Whether deleted entries move to the recycle bin
    pub recycle_bin_enabled: bool,
    /// Identifier of the recycle bin group, if one exists
    pub recycle_bin_uuid: Option<Uuid>,
    /// Non standard information from plugins and other clients
    pub custom_data: Vec<Field>,
    /// Memory protection configuration for this client
    pub memory_protection: MemoryProtection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Audit times for an item
pub struct Times {
    /// Time last edited
    pub last_modification_time: NaiveDateTime,
    /// Time created
    pub creation_time: NaiveDateTime,
    /// Time last accessed
    pub last_access_time: NaiveDateTime,
    /// Time at which this password needs rotation
    pub expiry_time: NaiveDateTime,
    /// Time at which this item was last moved within the database
    pub location_changed: NaiveDateTime,
    /// Whether this password expires
    pub expires: bool,
    /// Count of usages with autofill functions
    pub usage_count: u32,
}

impl Times {
    /// Audit times with every timestamp set to `now`
    pub fn new(now: NaiveDateTime) -> Times {
        Times {
            expires: false,
            usage_count: 0,
            last_modification_time: now,
            creation_time: now,
            last_access_time: now,
            expiry_time: now,
            location_changed: now,
        }
    }
}

impl Default for Times {
    fn default() -> Times {
        let now = chrono::Utc::now()
            .naive_utc()
            .with_nanosecond(0)
            .unwrap_or_else(|| chrono::Utc::now().naive_utc());
        Times::new(now)
    }
}

/// Filter for enumerating vault entries
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryFilter {
    /// Limit results to a single group's subtree
    pub group_id: Option<Uuid>,
    /// Case-insensitive substring match against title, username, URL,
    /// notes and tags
    pub search: Option<String>,
    /// Include entries inside the recycle bin
    pub include_recycled: bool,
}

/// Read-only projection of an entry handed across the dispatcher boundary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    /// Entry identifier
    pub id: Uuid,
    /// Identifier of the containing group
    pub group_id: Uuid,
    /// Entry title
    pub title: String,
    /// Account username
    pub username: String,
    /// Account password, revealed for the trusted caller
    pub password: String,
    /// Stored URL
    pub url: String,
    /// Free-form notes
    pub notes: String,
    /// Labels attached to the entry
    pub tags: Vec<String>,
    /// Custom fields beyond the well-known set
    pub custom_fields: BTreeMap<String, String>,
    /// Creation timestamp
    pub creation_time: NaiveDateTime,
    /// Last modification timestamp
    pub last_mod_time: NaiveDateTime,
}

impl EntryView {
    fn project(group: &Group, entry: &Entry) -> EntryView {
        let known = [
            FIELD_TITLE,
            FIELD_USERNAME,
            FIELD_PASSWORD,
            FIELD_URL,
            FIELD_NOTES,
        ];
        let mut custom_fields = BTreeMap::new();
        for field in entry.fields() {
            if !known.contains(&field.key()) {
                if let Some(value) = field.reveal() {
                    custom_fields.insert(field.key().to_string(), value.to_string());
                }
            }
        }
        EntryView {
            id: entry.uuid(),
            group_id: group.uuid(),
            title: entry.title().unwrap_or_default().to_string(),
            username: entry.username().unwrap_or_default().to_string(),
            password: entry
                .password()
                .map(|p| p.to_string())
                .unwrap_or_default(),
            url: entry.url().unwrap_or_default().to_string(),
            notes: entry.notes().unwrap_or_default().to_string(),
            tags: entry.tags().to_vec(),
            custom_fields,
            creation_time: entry.times().creation_time,
            last_mod_time: entry.times().last_modification_time,
        }
    }
}

/// Read-only projection of a group handed across the dispatcher boundary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    /// Group identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Identifier of the parent group, absent for the root
    pub parent_id: Option<Uuid>,
    /// Display icon index
    pub icon_id: u32,
    /// Number of entries directly inside this group
    pub entry_count: usize,
}

/// Input for creating a new entry
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryDraft {
    /// Target group; the root group when absent
    pub group_id: Option<Uuid>,
    /// Entry title
    pub title: String,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
    /// Stored URL
    pub url: String,
    /// Free-form notes
    pub notes: String,
    /// Labels to attach
    pub tags: Vec<String>,
}

/// Input for updating an existing entry; absent fields are left untouched
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    /// Identifier of the entry to update
    pub id: Uuid,
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New username
    #[serde(default)]
    pub username: Option<String>,
    /// New password
    #[serde(default)]
    pub password: Option<String>,
    /// New URL
    #[serde(default)]
    pub url: Option<String>,
    /// New notes
    #[serde(default)]
    pub notes: Option<String>,
    /// New labels, replacing the previous set
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decrypted password vault
///
/// See the [module-level documentation][crate::database] for more information.
pub struct Vault {
    /// Meta information about this vault
    pub(crate) meta: Meta,
    /// Trees of items in this vault
    pub(crate) groups: Vec<Group>,
}

impl Default for Vault {
    fn default() -> Self {
        let root = Group::new("Root");
        Vault {
            meta: Meta {
                recycle_bin_enabled: true,
                ..Meta::default()
            },
            groups: vec![root],
        }
    }
}

impl Vault {
    /// Construct a fresh empty vault with default meta and a new root group
    pub fn new<S: ToString>(name: S) -> Vault {
        let mut vault = Vault::default();
        vault.meta.database_name = name.to_string();
        vault
    }

    /// Return meta information about the vault like name and recycle bin state
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Mutable meta information about the vault
    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    /// Get the database name
    pub fn name(&self) -> &str {
        &self.meta.database_name
    }

    /// Set the database name
    pub fn set_name<S: ToString>(&mut self, name: S) {
        self.meta.database_name = name.to_string();
    }

    /// Add a entry to the root group
    pub fn add_entry(&mut self, entry: Entry) {
        self.groups[0].entries.push(entry);
    }

    /// Add a child group to the root group
    pub fn add_group(&mut self, group: Group) {
        self.groups[0].groups.push(group);
    }

    /// Replace the root group (and therefore all entries!) with a custom tree
    pub fn replace_root(&mut self, group: Group) {
        self.groups = vec![group];
    }

    /// Top level group for vault entries
    pub fn root(&self) -> &Group {
        &self.groups[0]
    }

    /// Mutable top level group for vault entries
    pub fn root_mut(&mut self) -> &mut Group {
        &mut self.groups[0]
    }

    /// Recursively searches for the first group matching a filter
    pub fn find_group<F: FnMut(&Group) -> bool>(&self, mut f: F) -> Option<&Group> {
        if f(self.root()) {
            return Some(self.root());
        }
        self.root().find_group(f)
    }

    /// Recursively searches for the first entry matching a filter
    pub fn find_entry<F: FnMut(&Entry) -> bool>(&self, f: F) -> Option<&Entry> {
        self.root().find_entry(f)
    }

    /// Recursively searches for the first entry matching a filter, mutably
    pub fn find_entry_mut<F: FnMut(&Entry) -> bool>(&mut self, f: F) -> Option<&mut Entry> {
        self.root_mut().find_entry_mut(f)
    }

    /// The recycle bin group, if the vault has one
    pub fn recycle_bin(&self) -> Option<&Group> {
        let uuid = self.meta.recycle_bin_uuid?;
        self.find_group(|g| g.uuid() == uuid)
    }

    /// Count of entries outside the recycle bin
    pub fn entry_count(&self) -> usize {
        let mut count = 0;
        self.walk(false, &mut |_, _| count += 1);
        count
    }

    fn is_recycle_group(&self, group: &Group) -> bool {
        self.meta.recycle_bin_uuid == Some(group.uuid())
    }

    /// Depth-first walk over (group, entry) pairs, optionally descending
    /// into the recycle bin subtree.
    fn walk<'a, F: FnMut(&'a Group, &'a Entry)>(&'a self, include_recycled: bool, f: &mut F) {
        fn visit<'a, F: FnMut(&'a Group, &'a Entry)>(
            vault: &'a Vault,
            group: &'a Group,
            include_recycled: bool,
            f: &mut F,
        ) {
            if !include_recycled && vault.is_recycle_group(group) {
                return;
            }
            for entry in group.entries() {
                f(group, entry);
            }
            for child in group.groups() {
                visit(vault, child, include_recycled, f);
            }
        }
        for group in &self.groups {
            visit(self, group, include_recycled, f);
        }
    }

    /// Enumerate entries as read-only views.
    ///
    /// Entries inside the recycle bin are excluded unless the filter
    /// explicitly asks for them.
    pub fn list_entries(&self, filter: &EntryFilter) -> Vec<EntryView> {
        let needle = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut views = Vec::new();
        let start_groups: Vec<&Group> = match filter.group_id {
            Some(group_id) => match self.find_group(|g| g.uuid() == group_id) {
                Some(group) => vec![group],
                None => return views,
            },
            None => self.groups.iter().collect(),
        };

        fn visit<'a>(
            vault: &'a Vault,
            group: &'a Group,
            include_recycled: bool,
            needle: &Option<String>,
            views: &mut Vec<EntryView>,
        ) {
            if !include_recycled && vault.is_recycle_group(group) {
                return;
            }
            for entry in group.entries() {
                if needle
                    .as_ref()
                    .map(|n| entry_matches(entry, n))
                    .unwrap_or(true)
                {
                    views.push(EntryView::project(group, entry));
                }
            }
            for child in group.groups() {
                visit(vault, child, include_recycled, needle, views);
            }
        }

        for group in start_groups {
            visit(self, group, filter.include_recycled, &needle, &mut views);
        }
        views
    }

    /// Look up a single entry by id, including recycled entries
    pub fn get_entry(&self, id: Uuid) -> Option<EntryView> {
        let mut found = None;
        self.walk(true, &mut |group, entry| {
            if entry.uuid() == id && found.is_none() {
                found = Some(EntryView::project(group, entry));
            }
        });
        found
    }

    /// Entries whose stored URL matches the host of `url`.
    ///
    /// The query's host is extracted (scheme and path stripped). An entry
    /// matches when its stored URL parses to the same host, when the query
    /// host is a subdomain of the stored host (`www.italki.com` matches a
    /// stored `italki.com`), or when the stored URL textually contains the
    /// host (fallback for host-only storage).
    pub fn entries_for_host(&self, url: &str) -> Vec<EntryView> {
        let host = match extract_host(url) {
            Some(host) => host,
            None => return Vec::new(),
        };
        let mut views = Vec::new();
        self.walk(false, &mut |group, entry| {
            let stored = entry.url().unwrap_or_default();
            if stored.is_empty() {
                return;
            }
            let matches = extract_host(stored)
                .map(|stored_host| {
                    stored_host == host || host.ends_with(&format!(".{}", stored_host))
                })
                .unwrap_or(false)
                || stored.to_lowercase().contains(&host);
            if matches {
                views.push(EntryView::project(group, entry));
            }
        });
        views
    }

    /// Create a new entry from a draft, assigning a fresh UUID.
    ///
    /// The entry is appended to the requested group, or the root group
    /// when no group is given or the given group does not exist.
    pub fn create_entry(&mut self, draft: EntryDraft, now: NaiveDateTime) -> EntryView {
        let mut entry = Entry {
            uuid: Uuid::new_v4(),
            fields: Vec::new(),
            tags: draft.tags.clone(),
            history: History::default(),
            times: Times::new(now),
        };
        entry.set_title(&draft.title);
        entry.set_username(&draft.username);
        entry.set_password(&draft.password);
        entry.set_url(&draft.url);
        entry.set_notes(&draft.notes);
        let id = entry.uuid();

        let root_uuid = self.root().uuid();
        let target_id = draft
            .group_id
            .filter(|gid| {
                *gid == root_uuid || self.root().find_group(|g| g.uuid() == *gid).is_some()
            })
            .unwrap_or(root_uuid);

        if target_id == root_uuid {
            self.root_mut().add_entry(entry);
        } else if let Some(group) = self.root_mut().find_group_mut(|g| g.uuid() == target_id) {
            // Mirrors the immutable lookup in the filter above
            group.add_entry(entry);
        }

        EntryView {
            id,
            group_id: target_id,
            title: draft.title,
            username: draft.username,
            password: draft.password,
            url: draft.url,
            notes: draft.notes,
            tags: draft.tags,
            custom_fields: BTreeMap::new(),
            creation_time: now,
            last_mod_time: now,
        }
    }

    /// Update an existing entry, pushing its prior state to history and
    /// advancing its modification time. Returns `None` for unknown ids.
    pub fn update_entry(&mut self, patch: EntryPatch, now: NaiveDateTime) -> Option<EntryView> {
        let id = patch.id;
        {
            let entry = self.find_entry_mut(|e| e.uuid() == id)?;
            entry.push_history();
            if let Some(title) = patch.title {
                entry.set_title(title);
            }
            if let Some(username) = patch.username {
                entry.set_username(username);
            }
            if let Some(password) = patch.password {
                entry.set_password(password);
            }
            if let Some(url) = patch.url {
                entry.set_url(url);
            }
            if let Some(notes) = patch.notes {
                entry.set_notes(notes);
            }
            if let Some(tags) = patch.tags {
                entry.set_tags(tags);
            }
            entry.times.last_modification_time = now;
        }
        self.get_entry(id)
    }

    /// Delete an entry.
    ///
    /// When the recycle bin is enabled the entry moves there (the bin
    /// group is created on first use); an entry already inside the bin,
    /// or any entry when the bin is disabled, is erased. Returns whether
    /// an entry was found.
    pub fn delete_entry(&mut self, id: Uuid, now: NaiveDateTime) -> bool {
        let holder = match self.group_of_entry(id) {
            Some(uuid) => uuid,
            None => return false,
        };

        let in_recycle_bin = self
            .meta
            .recycle_bin_uuid
            .map(|bin| {
                bin == holder || self.group_subtree_contains(bin, holder)
            })
            .unwrap_or(false);

        if !self.meta.recycle_bin_enabled || in_recycle_bin {
            return self.erase_entry(holder, id);
        }

        let bin_uuid = self.ensure_recycle_bin(now);
        let mut entry = match self.take_entry(holder, id) {
            Some(entry) => entry,
            None => return false,
        };
        entry.times.location_changed = now;
        if let Some(bin) = self.root_mut().find_group_mut(|g| g.uuid() == bin_uuid) {
            bin.add_entry(entry);
            true
        } else {
            // Bin vanished between ensure and insert; fall back to erase
            false
        }
    }

    /// Depth-first list of groups, excluding the recycle bin
    pub fn list_groups(&self) -> Vec<GroupView> {
        fn visit(
            vault: &Vault,
            group: &Group,
            parent: Option<Uuid>,
            views: &mut Vec<GroupView>,
        ) {
            if vault.is_recycle_group(group) {
                return;
            }
            views.push(GroupView {
                id: group.uuid(),
                name: group.name().to_string(),
                parent_id: parent,
                icon_id: group.icon_id(),
                entry_count: group.entry_count(),
            });
            for child in group.groups() {
                visit(vault, child, Some(group.uuid()), views);
            }
        }
        let mut views = Vec::new();
        for group in &self.groups {
            visit(self, group, None, &mut views);
        }
        views
    }

    fn group_of_entry(&self, id: Uuid) -> Option<Uuid> {
        let mut holder = None;
        self.walk(true, &mut |group, entry| {
            if entry.uuid() == id && holder.is_none() {
                holder = Some(group.uuid());
            }
        });
        holder
    }

    fn group_subtree_contains(&self, ancestor: Uuid, descendant: Uuid) -> bool {
        self.find_group(|g| g.uuid() == ancestor)
            .map(|g| g.find_group(|child| child.uuid() == descendant).is_some())
            .unwrap_or(false)
    }

    fn take_entry(&mut self, holder: Uuid, id: Uuid) -> Option<Entry> {
        if self.root().uuid() == holder {
            return self.root_mut().remove_entry(id);
        }
        self.root_mut()
            .find_group_mut(|g| g.uuid() == holder)?
            .remove_entry(id)
    }

    fn erase_entry(&mut self, holder: Uuid, id: Uuid) -> bool {
        self.take_entry(holder, id).is_some()
    }

    fn ensure_recycle_bin(&mut self, now: NaiveDateTime) -> Uuid {
        if let Some(uuid) = self.meta.recycle_bin_uuid {
            if self.find_group(|g| g.uuid() == uuid).is_some() {
                return uuid;
            }
        }
        let mut bin = Group::new(RECYCLE_BIN_NAME);
        bin.times = Times::new(now);
        let uuid = bin.uuid();
        self.meta.recycle_bin_uuid = Some(uuid);
        self.add_group(bin);
        uuid
    }
}

fn entry_matches(entry: &Entry, needle: &str) -> bool {
    let haystacks = [
        entry.title().unwrap_or_default(),
        entry.username().unwrap_or_default(),
        entry.url().unwrap_or_default(),
        entry.notes().unwrap_or_default(),
    ];
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(needle))
        || entry
            .tags()
            .iter()
            .any(|tag| tag.to_lowercase().contains(needle))
}

/// Extract the lowercased host from a URL-ish string.
///
/// Accepts full URLs and bare hosts ("gmail.com").
pub(crate) fn extract_host(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = url::Url::parse(trimmed) {
        if let Some(host) = parsed.host_str() {
            return Some(host.to_lowercase());
        }
    }
    // Host-only storage without a scheme
    let with_scheme = format!("https://{}", trimmed);
    url::Url::parse(&with_scheme)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::Utc::now().naive_utc().with_nanosecond(0).unwrap()
    }

    fn draft(title: &str, url: &str) -> EntryDraft {
        EntryDraft {
            title: title.to_string(),
            username: "user".to_string(),
            password: "pw".to_string(),
            url: url.to_string(),
            notes: String::new(),
            tags: vec!["mail".to_string()],
            group_id: None,
        }
    }

    #[test]
    fn create_assigns_uuid_and_timestamps() {
        let mut vault = Vault::new("Test");
        let created_at = now();
        let view = vault.create_entry(draft("Gmail", "gmail.com"), created_at);
        assert_eq!(view.title, "Gmail");
        assert_eq!(view.creation_time, created_at);
        assert_eq!(view.group_id, vault.root().uuid());
        assert_eq!(vault.entry_count(), 1);
    }

    #[test]
    fn update_pushes_history_and_bumps_mod_time() {
        let mut vault = Vault::new("Test");
        let t0 = now();
        let view = vault.create_entry(draft("Gmail", "gmail.com"), t0);
        let t1 = t0 + chrono::Duration::seconds(5);

        let updated = vault
            .update_entry(
                EntryPatch {
                    id: view.id,
                    title: Some("Gmail Work".to_string()),
                    username: None,
                    password: None,
                    url: None,
                    notes: None,
                    tags: None,
                },
                t1,
            )
            .unwrap();

        assert_eq!(updated.title, "Gmail Work");
        assert_eq!(updated.last_mod_time, t1);
        let entry = vault.find_entry(|e| e.uuid() == view.id).unwrap();
        assert_eq!(entry.history().len(), 1);
        assert_eq!(entry.history().get(0).unwrap().title(), Some("Gmail"));
    }

    #[test]
    fn deleted_entries_hide_in_recycle_bin() {
        let mut vault = Vault::new("Test");
        let view = vault.create_entry(draft("Gmail", "gmail.com"), now());

        assert!(vault.delete_entry(view.id, now()));
        assert!(vault.list_entries(&EntryFilter::default()).is_empty());

        // Still reachable when recycled entries are requested
        let filter = EntryFilter {
            include_recycled: true,
            ..EntryFilter::default()
        };
        assert_eq!(vault.list_entries(&filter).len(), 1);

        // Second delete erases for good
        assert!(vault.delete_entry(view.id, now()));
        assert!(vault.list_entries(&filter).is_empty());
    }

    #[test]
    fn recycle_bin_excluded_from_groups() {
        let mut vault = Vault::new("Test");
        let view = vault.create_entry(draft("Gmail", "gmail.com"), now());
        vault.delete_entry(view.id, now());

        let groups = vault.list_groups();
        assert!(groups.iter().all(|g| g.name != RECYCLE_BIN_NAME));
    }

    #[test]
    fn search_matches_tags_case_insensitively() {
        let mut vault = Vault::new("Test");
        vault.create_entry(draft("Gmail", "gmail.com"), now());
        vault.create_entry(draft("Bank", "bank.example"), now());

        let filter = EntryFilter {
            search: Some("MAIL".to_string()),
            ..EntryFilter::default()
        };
        // "mail" tag matches both, title matches Gmail
        assert_eq!(vault.list_entries(&filter).len(), 2);

        let filter = EntryFilter {
            search: Some("bank".to_string()),
            ..EntryFilter::default()
        };
        assert_eq!(vault.list_entries(&filter).len(), 1);
    }

    #[test]
    fn host_matching_strips_scheme_and_path() {
        let mut vault = Vault::new("Test");
        vault.create_entry(draft("Italki", "italki.com"), now());
        vault.create_entry(draft("Example", "https://example.org/login"), now());

        let hits = vault.entries_for_host("https://www.italki.com/lesson/42");
        // www.italki.com is a subdomain of the stored italki.com
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Italki");

        let hits = vault.entries_for_host("https://example.org/");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Example");

        assert!(vault.entries_for_host("https://nomatch.net").is_empty());
    }
}
