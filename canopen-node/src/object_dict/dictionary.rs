use std::collections::BTreeMap;

use canopen_common::{
    objects::{AccessType, DataType, ObjectCode, ObjectId, SubInfo},
    Value,
};
use snafu::ensure;

use super::{
    schema::EntryDefinition, AccessDeniedSnafu, DefaultTypeMismatchSnafu, DuplicateEntrySnafu,
    NoSuchEntrySnafu, OdError, SchemaError, TypeMismatchSnafu,
};

/// A callback invoked synchronously after every successful write
pub type UpdateListener = Box<dyn FnMut(ObjectId, &Value) + Send>;

#[derive(Debug, Clone)]
struct SubObject {
    name: String,
    info: SubInfo,
    raw: Vec<u8>,
    default: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Object {
    code: ObjectCode,
    subs: BTreeMap<u8, SubObject>,
}

/// A node's object dictionary
///
/// Holds the raw little endian bytes of every sub object along with its type and access
/// information. All mutation goes through [`write`](Self::write), [`write_raw`](Self::write_raw) or
/// [`set`](Self::set), which check the value against the declared type before atomically replacing
/// the stored bytes.
///
/// Every successful mutation notifies the registered listeners and is recorded in an update
/// journal, which the owning node drains to trigger event driven PDOs.
pub struct ObjectDictionary {
    objects: BTreeMap<u16, Object>,
    listeners: Vec<UpdateListener>,
    updates: Vec<ObjectId>,
}

impl core::fmt::Debug for ObjectDictionary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectDictionary")
            .field("objects", &self.objects)
            .field("listeners", &self.listeners.len())
            .field("updates", &self.updates)
            .finish()
    }
}

impl Default for ObjectDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            listeners: Vec::new(),
            updates: Vec::new(),
        }
    }

    /// Build a dictionary from a sequence of entry definitions
    ///
    /// Objects which define sub indices above 0 get a constant UInt8 sub 0 holding the highest sub
    /// index, unless the definitions provide one.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = EntryDefinition>,
    ) -> Result<Self, SchemaError> {
        let mut od = Self::new();
        for def in definitions {
            od.insert(def)?;
        }
        od.finalize_objects();
        Ok(od)
    }

    fn insert(&mut self, def: EntryDefinition) -> Result<(), SchemaError> {
        let EntryDefinition {
            index,
            sub,
            name,
            data_type,
            access_type,
            pdo_mapping,
            default,
        } = def;
        let default = default.unwrap_or_else(|| Value::zero(data_type));
        ensure!(
            default.data_type() == data_type,
            DefaultTypeMismatchSnafu {
                index,
                sub,
                expected: data_type,
                found: default.data_type(),
            }
        );

        let object = self.objects.entry(index).or_default();
        ensure!(
            !object.subs.contains_key(&sub),
            DuplicateEntrySnafu { index, sub }
        );
        let raw = default.to_bytes();
        object.subs.insert(
            sub,
            SubObject {
                name,
                info: SubInfo::new(data_type)
                    .access(access_type)
                    .mappable(pdo_mapping),
                default: raw.clone(),
                raw,
            },
        );
        Ok(())
    }

    fn finalize_objects(&mut self) {
        for object in self.objects.values_mut() {
            let highest = object.subs.keys().next_back().copied().unwrap_or(0);
            if highest == 0 {
                object.code = ObjectCode::Var;
                continue;
            }
            object.subs.entry(0).or_insert_with(|| SubObject {
                name: "Highest sub-index supported".to_string(),
                info: SubInfo::MAX_SUB_NUMBER,
                raw: vec![highest],
                default: vec![highest],
            });
            let mut types = object.subs.range(1..).map(|(_, s)| s.info.data_type);
            let first = types.next();
            object.code = if types.all(|t| Some(t) == first) {
                ObjectCode::Array
            } else {
                ObjectCode::Record
            };
        }
    }

    fn sub_object(&self, index: u16, sub: u8) -> Result<&SubObject, OdError> {
        self.objects
            .get(&index)
            .and_then(|obj| obj.subs.get(&sub))
            .ok_or(OdError::NoSuchEntry { index, sub })
    }

    fn sub_object_mut(&mut self, index: u16, sub: u8) -> Result<&mut SubObject, OdError> {
        self.objects
            .get_mut(&index)
            .and_then(|obj| obj.subs.get_mut(&sub))
            .ok_or(OdError::NoSuchEntry { index, sub })
    }

    /// Returns true if any sub object exists at `index`
    pub fn contains_object(&self, index: u16) -> bool {
        self.objects.contains_key(&index)
    }

    /// Returns true if the sub object exists
    pub fn contains(&self, index: u16, sub: u8) -> bool {
        self.sub_object(index, sub).is_ok()
    }

    /// Get the object code of the object at `index`
    pub fn object_code(&self, index: u16) -> Option<ObjectCode> {
        self.objects.get(&index).map(|obj| obj.code)
    }

    /// Get the type and access information of a sub object
    pub fn sub_info(&self, index: u16, sub: u8) -> Result<SubInfo, OdError> {
        Ok(self.sub_object(index, sub)?.info)
    }

    /// Get the parameter name of a sub object
    pub fn name(&self, index: u16, sub: u8) -> Result<&str, OdError> {
        Ok(&self.sub_object(index, sub)?.name)
    }

    /// Iterate over the address and info of every sub object, in index order
    pub fn entries(&self) -> impl Iterator<Item = (ObjectId, SubInfo)> + '_ {
        self.objects.iter().flat_map(|(&index, obj)| {
            obj.subs
                .iter()
                .map(move |(&sub, s)| (ObjectId { index, sub }, s.info))
        })
    }

    /// Read the typed value of a sub object
    ///
    /// Fails with `AccessDenied` if the sub object is write-only.
    pub fn read(&self, index: u16, sub: u8) -> Result<Value, OdError> {
        let subobj = self.sub_object(index, sub)?;
        ensure!(
            subobj.info.access_type.is_readable(),
            AccessDeniedSnafu { index, sub }
        );
        Self::decode(index, sub, subobj)
    }

    /// Read the typed value of a sub object, ignoring its access type
    ///
    /// For use by the application owning the dictionary.
    pub fn get(&self, index: u16, sub: u8) -> Result<Value, OdError> {
        let subobj = self.sub_object(index, sub)?;
        Self::decode(index, sub, subobj)
    }

    fn decode(index: u16, sub: u8, subobj: &SubObject) -> Result<Value, OdError> {
        // Stored bytes always match the declared type, but an invalid UTF-8 visible string may
        // have been written as raw bytes.
        Value::from_bytes(subobj.info.data_type, &subobj.raw).map_err(|_| OdError::TypeMismatch {
            index,
            sub,
            expected: subobj.info.data_type,
        })
    }

    /// Read the raw bytes of a sub object
    ///
    /// Fails with `AccessDenied` if the sub object is write-only.
    pub fn read_raw(&self, index: u16, sub: u8) -> Result<&[u8], OdError> {
        let subobj = self.sub_object(index, sub)?;
        ensure!(
            subobj.info.access_type.is_readable(),
            AccessDeniedSnafu { index, sub }
        );
        Ok(&subobj.raw)
    }

    /// Check whether [`write`](Self::write) of `value` would succeed, without writing it
    pub fn check_write(&self, index: u16, sub: u8, value: &Value) -> Result<(), OdError> {
        let subobj = self.sub_object(index, sub)?;
        ensure!(
            subobj.info.access_type.is_writable(),
            AccessDeniedSnafu { index, sub }
        );
        ensure!(
            value.data_type() == subobj.info.data_type,
            TypeMismatchSnafu {
                index,
                sub,
                expected: subobj.info.data_type,
            }
        );
        Ok(())
    }

    /// Write a typed value to a sub object
    ///
    /// Fails with `AccessDenied` if the sub object is read-only or constant, and with
    /// `TypeMismatch` if the value's type differs from the declared type.
    pub fn write(&mut self, index: u16, sub: u8, value: impl Into<Value>) -> Result<(), OdError> {
        let value = value.into();
        self.check_write(index, sub, &value)?;
        self.store(index, sub, value)
    }

    /// Write raw bytes to a sub object
    ///
    /// The length must match the width of fixed size types. Any length is accepted for strings.
    pub fn write_raw(&mut self, index: u16, sub: u8, data: &[u8]) -> Result<(), OdError> {
        let info = self.sub_info(index, sub)?;
        ensure!(
            info.access_type.is_writable(),
            AccessDeniedSnafu { index, sub }
        );
        let value = Value::from_bytes(info.data_type, data).map_err(|_| OdError::TypeMismatch {
            index,
            sub,
            expected: info.data_type,
        })?;
        self.store(index, sub, value)
    }

    /// Write a typed value as the application owning the dictionary
    ///
    /// The type is checked, but the access type is not, so this can be used to update read-only
    /// values such as measurements. Constant sub objects still cannot be changed.
    pub fn set(&mut self, index: u16, sub: u8, value: impl Into<Value>) -> Result<(), OdError> {
        let value = value.into();
        let info = self.sub_info(index, sub)?;
        ensure!(
            info.access_type != AccessType::Const,
            AccessDeniedSnafu { index, sub }
        );
        ensure!(
            value.data_type() == info.data_type,
            TypeMismatchSnafu {
                index,
                sub,
                expected: info.data_type,
            }
        );
        self.store(index, sub, value)
    }

    fn store(&mut self, index: u16, sub: u8, value: Value) -> Result<(), OdError> {
        let subobj = self.sub_object_mut(index, sub)?;
        subobj.raw = value.to_bytes();

        let id = ObjectId { index, sub };
        self.updates.push(id);
        for listener in self.listeners.iter_mut() {
            listener(id, &value);
        }
        Ok(())
    }

    /// Register a callback to be invoked after each successful write
    pub fn subscribe(&mut self, listener: impl FnMut(ObjectId, &Value) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Take the list of sub objects written since the last call
    pub fn take_updates(&mut self) -> Vec<ObjectId> {
        core::mem::take(&mut self.updates)
    }

    /// Restore every sub object to its default value
    ///
    /// Listeners are not notified.
    pub fn reset_to_defaults(&mut self) {
        for object in self.objects.values_mut() {
            for subobj in object.subs.values_mut() {
                subobj.raw.clone_from(&subobj.default);
            }
        }
        self.updates.clear();
    }

    /// Read an unsigned integer value, ignoring access type
    ///
    /// Returns None if the entry is missing or not an unsigned integer. Used for reading
    /// communication parameters.
    pub fn get_u32(&self, index: u16, sub: u8) -> Option<u32> {
        match self.get(index, sub).ok()? {
            Value::UInt8(v) => Some(v as u32),
            Value::UInt16(v) => Some(v as u32),
            Value::UInt32(v) => Some(v),
            _ => None,
        }
    }

    /// The declared data type of a sub object
    pub fn data_type(&self, index: u16, sub: u8) -> Result<DataType, OdError> {
        Ok(self.sub_info(index, sub)?.data_type)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use canopen_common::objects::PdoMappable;

    use super::*;
    use crate::object_dict::schema::{array, var};

    fn test_od() -> ObjectDictionary {
        let mut defs = vec![
            var(0x2000, "rw u32", DataType::UInt32).default_value(7u32),
            EntryDefinition::new(0x2001, 0, "ro i16", DataType::Int16).default_value(-3i16),
            EntryDefinition::new(0x2002, 0, "wo u8", DataType::UInt8).access(AccessType::Wo),
            var(0x2003, "name", DataType::VisibleString).default_value("hello"),
            EntryDefinition::new(0x2005, 1, "speed", DataType::Int32)
                .access(AccessType::Rw)
                .mappable(PdoMappable::Both),
            EntryDefinition::new(0x2005, 2, "enabled", DataType::Boolean)
                .access(AccessType::Rw),
        ];
        defs.extend(array(0x2004, "arr", DataType::UInt16, 3, AccessType::Rw));
        ObjectDictionary::from_definitions(defs).unwrap()
    }

    #[test]
    fn test_read_write() {
        let mut od = test_od();
        assert_eq!(Value::UInt32(7), od.read(0x2000, 0).unwrap());
        od.write(0x2000, 0, 0xdead_beefu32).unwrap();
        assert_eq!(Value::UInt32(0xdead_beef), od.read(0x2000, 0).unwrap());
        assert_eq!(&[0xef, 0xbe, 0xad, 0xde], od.read_raw(0x2000, 0).unwrap());

        od.write(0x2003, 0, "a much longer name").unwrap();
        assert_eq!(b"a much longer name", od.read_raw(0x2003, 0).unwrap());
    }

    #[test]
    fn test_errors() {
        let mut od = test_od();
        assert_eq!(
            Err(OdError::AccessDenied {
                index: 0x2001,
                sub: 0
            }),
            od.write(0x2001, 0, 5i16)
        );
        assert_eq!(
            Err(OdError::AccessDenied {
                index: 0x2002,
                sub: 0
            }),
            od.read(0x2002, 0)
        );
        assert_eq!(
            Err(OdError::TypeMismatch {
                index: 0x2000,
                sub: 0,
                expected: DataType::UInt32
            }),
            od.write(0x2000, 0, 5u16)
        );
        assert_eq!(
            Err(OdError::NoSuchEntry {
                index: 0x3000,
                sub: 0
            }),
            od.read(0x3000, 0)
        );
        assert_eq!(
            Err(OdError::NoSuchEntry {
                index: 0x2004,
                sub: 4
            }),
            od.write(0x2004, 4, 1u16)
        );
        // Failed writes leave the value alone
        assert_eq!(Value::UInt32(7), od.read(0x2000, 0).unwrap());
    }

    #[test]
    fn test_write_raw_checks_length() {
        let mut od = test_od();
        assert_eq!(
            Err(OdError::TypeMismatch {
                index: 0x2000,
                sub: 0,
                expected: DataType::UInt32
            }),
            od.write_raw(0x2000, 0, &[1, 2])
        );
        od.write_raw(0x2000, 0, &[1, 0, 0, 0]).unwrap();
        assert_eq!(Value::UInt32(1), od.read(0x2000, 0).unwrap());
    }

    #[test]
    fn test_set_bypasses_read_only() {
        let mut od = test_od();
        od.set(0x2001, 0, 100i16).unwrap();
        assert_eq!(Value::Int16(100), od.read(0x2001, 0).unwrap());
        od.reset_to_defaults();
        assert_eq!(Value::Int16(-3), od.read(0x2001, 0).unwrap());
    }

    #[test]
    fn test_sub_zero_and_object_codes() {
        let od = test_od();
        assert_eq!(Value::UInt8(3), od.read(0x2004, 0).unwrap());
        assert_eq!(Some(ObjectCode::Array), od.object_code(0x2004));
        assert_eq!(Some(ObjectCode::Record), od.object_code(0x2005));
        assert_eq!(Some(ObjectCode::Var), od.object_code(0x2000));
        assert_eq!(AccessType::Const, od.sub_info(0x2004, 0).unwrap().access_type);
    }

    #[test]
    fn test_schema_errors() {
        let dup = vec![
            var(0x2000, "a", DataType::UInt8),
            var(0x2000, "b", DataType::UInt8),
        ];
        assert_eq!(
            Some(SchemaError::DuplicateEntry {
                index: 0x2000,
                sub: 0
            }),
            ObjectDictionary::from_definitions(dup).err()
        );

        let bad_default = vec![var(0x2000, "a", DataType::UInt8).default_value(1u32)];
        assert!(matches!(
            ObjectDictionary::from_definitions(bad_default),
            Err(SchemaError::DefaultTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_listeners_and_journal() {
        let mut od = test_od();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        od.subscribe(move |id, value| seen_clone.lock().unwrap().push((id, value.clone())));

        od.write(0x2000, 0, 9u32).unwrap();
        // Rejected writes do not notify
        let _ = od.write(0x2001, 0, 9i16);

        assert_eq!(
            vec![(ObjectId::new(0x2000, 0), Value::UInt32(9))],
            *seen.lock().unwrap()
        );
        assert_eq!(vec![ObjectId::new(0x2000, 0)], od.take_updates());
        assert!(od.take_updates().is_empty());
    }
}
