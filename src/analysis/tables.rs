//! Static configuration for the pairing engines: which container types and
//! entry-point methods to watch, and which read/write method names are
//! type-compatible.
//!
//! These tables are data versioned alongside the target platform's container
//! API surface. They are built explicitly and handed to the engines at
//! construction; there is no global singleton.

use crate::jvm::{BinaryName, Name, UnqualifiedName};
use std::collections::{HashMap, HashSet};

/// Compatibility between read-method names and write-method names
///
/// A read method may accept values produced by more than one write method
/// (eg. `readArrayList` pairs with `writeList`), so this is a multimap.
#[derive(Debug, Clone)]
pub struct CompatTable {
    read_to_writes: HashMap<&'static str, Vec<&'static str>>,
    write_names: HashSet<&'static str>,
}

impl CompatTable {
    pub fn new(pairs: &[(&'static str, &'static str)]) -> CompatTable {
        let mut read_to_writes: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        let mut write_names = HashSet::new();
        for (read, write) in pairs {
            read_to_writes.entry(read).or_default().push(write);
            write_names.insert(*write);
        }
        CompatTable {
            read_to_writes,
            write_names,
        }
    }

    pub fn is_read(&self, name: &UnqualifiedName) -> bool {
        self.read_to_writes.contains_key(name.as_str())
    }

    pub fn is_write(&self, name: &UnqualifiedName) -> bool {
        self.write_names.contains(name.as_str())
    }

    /// Whether a value written by `write` may be consumed by `read`
    pub fn compatible(&self, read: &UnqualifiedName, write: &UnqualifiedName) -> bool {
        match self.read_to_writes.get(read.as_str()) {
            Some(writes) => writes.contains(&write.as_str()),
            None => false,
        }
    }

    /// The `android/os/Parcel` read/write surface
    pub fn parcel() -> CompatTable {
        CompatTable::new(&[
            ("readArray", "writeArray"),
            ("readArrayList", "writeList"),
            ("readBinderArray", "writeBinderArray"),
            ("readBinderList", "writeBinderList"),
            ("readBooleanArray", "writeBooleanArray"),
            ("readBundle", "writeBundle"),
            ("readByte", "writeByte"),
            ("readByteArray", "writeByteArray"),
            ("readCharArray", "writeCharArray"),
            ("readDouble", "writeDouble"),
            ("readDoubleArray", "writeDoubleArray"),
            ("readException", "writeException"),
            ("readFileDescriptor", "writeFileDescriptor"),
            ("readFloat", "writeFloat"),
            ("readFloatArray", "writeFloatArray"),
            ("readHashMap", "writeMap"),
            ("readInt", "writeInt"),
            ("readIntArray", "writeIntArray"),
            ("readList", "writeList"),
            ("readLong", "writeLong"),
            ("readLongArray", "writeLongArray"),
            ("readMap", "writeMap"),
            ("readParcelable", "writeParcelable"),
            ("readParcelableArray", "writeParcelableArray"),
            ("readPersistableBundle", "writePersistableBundle"),
            ("readSerializable", "writeSerializable"),
            ("readSize", "writeSize"),
            ("readSizeF", "writeSizeF"),
            ("readSparseArray", "writeSparseArray"),
            ("readSparseBooleanArray", "writeSparseBooleanArray"),
            ("readString", "writeString"),
            ("readStringArray", "writeStringArray"),
            ("readStringList", "writeStringList"),
            ("readStrongBinder", "writeStrongBinder"),
            ("readStrongBinder", "writeInterfaceToken"),
            ("readStrongBinder", "writeStrongInterface"),
            ("readTypedArray", "writeTypedArray"),
            ("readTypedList", "writeTypedList"),
            ("readValue", "writeValue"),
        ])
    }
}

/// Configuration for the Ordered Queue Pairing engine
#[derive(Debug, Clone)]
pub struct OrderedConfig {
    /// Container whose accesses are paired
    pub container: BinaryName,
    /// Methods whose body forms the write sequence
    pub write_entry_points: Vec<UnqualifiedName>,
    /// Methods whose body forms the read sequence; a constructor taking the
    /// container also qualifies
    pub read_entry_points: Vec<UnqualifiedName>,
    pub compat: CompatTable,
}

impl OrderedConfig {
    /// The Parcelable write/read contract
    pub fn parcel() -> OrderedConfig {
        OrderedConfig {
            container: BinaryName::PARCEL,
            write_entry_points: vec![UnqualifiedName::WRITETOPARCEL],
            read_entry_points: vec![
                UnqualifiedName::INIT,
                UnqualifiedName::READFROMPARCEL,
                UnqualifiedName::CREATEFROMPARCEL,
            ],
            compat: CompatTable::parcel(),
        }
    }
}

/// Configuration for the Keyed Map Pairing engine
#[derive(Debug, Clone)]
pub struct KeyedConfig {
    /// Container whose accesses are paired
    pub container: BinaryName,
    /// Methods whose container stores are "saves"
    pub save_entry_points: Vec<UnqualifiedName>,
    /// Methods whose container loads are "restores"
    pub restore_entry_points: Vec<UnqualifiedName>,
}

impl KeyedConfig {
    /// The instance-state save/restore contract
    pub fn bundle() -> KeyedConfig {
        KeyedConfig {
            container: BinaryName::BUNDLE,
            save_entry_points: vec![UnqualifiedName::ONSAVEINSTANCESTATE],
            restore_entry_points: vec![
                // Common methods
                UnqualifiedName::ONCREATE,
                // Activity methods
                UnqualifiedName::ONPOSTCREATE,
                UnqualifiedName::ONRESTOREINSTANCESTATE,
                // Fragment methods
                UnqualifiedName::ONACTIVITYCREATED,
                UnqualifiedName::ONCREATEVIEW,
                UnqualifiedName::ONVIEWCREATED,
            ],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;

    fn name(s: &str) -> UnqualifiedName {
        UnqualifiedName::from_string(s.to_string()).unwrap()
    }

    #[test]
    fn parcel_table_pairs() {
        let table = CompatTable::parcel();
        assert!(table.compatible(&name("readInt"), &name("writeInt")));
        assert!(table.compatible(&name("readArrayList"), &name("writeList")));
        assert!(table.compatible(&name("readStrongBinder"), &name("writeInterfaceToken")));
        assert!(!table.compatible(&name("readInt"), &name("writeString")));
    }

    #[test]
    fn direction_classification() {
        let table = CompatTable::parcel();
        assert!(table.is_read(&name("readDouble")));
        assert!(!table.is_read(&name("writeDouble")));
        assert!(table.is_write(&name("writeDouble")));
        assert!(!table.is_write(&name("dataPosition")));
    }
}
