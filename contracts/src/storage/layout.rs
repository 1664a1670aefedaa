//! Versioned storage layout descriptors.
//!
//! A backend declares the persistent fields it reads and writes as an ordered
//! list, and the field at position `i` lives in storage slot `i`. Every
//! backend installed behind the same proxy must agree on the type of every
//! position they share, so a new version may only append fields.
//!
//! Layouts are plain data and can be kept next to a backend's source as JSON:
//!
//! ```
//! use upgradeable_proxy::storage::{FieldType, StorageLayout};
//!
//! let layout = StorageLayout::from_json(
//!     r#"{
//!         "version": 2,
//!         "fields": [
//!             { "name": "count", "ty": { "uint": 256 } },
//!             { "name": "last_caller", "ty": "address" }
//!         ]
//!     }"#,
//! )
//! .expect("layout should parse");
//!
//! assert_eq!(layout.fields()[1].ty, FieldType::Address);
//! ```
use std::{collections::HashSet, fmt};

use alloy_primitives::U256;
use alloy_sol_types::SolError;
use serde::{Deserialize, Serialize};
pub use sol::*;

#[cfg_attr(coverage_nightly, coverage(off))]
mod sol {
    use alloy_sol_macro::sol;

    sol! {
        /// A layout declares the same field name twice.
        ///
        /// * `name` - Name of the duplicated field.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error StorageLayoutDuplicateField(string name);

        /// A layout declares a field without a name or with a type no slot
        /// can hold, eg. `uint7` or `bytes33`.
        ///
        /// * `name` - Name of the malformed field.
        /// * `ty` - Declared type of the field.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error StorageLayoutInvalidField(string name, string ty);

        /// A layout changes the type stored at a position that an installed
        /// layout already uses.
        ///
        /// * `position` - Slot index of the conflicting field.
        /// * `expected` - Type already stored at `position`.
        /// * `found` - Type the new layout declares at `position`.
        #[derive(Debug, PartialEq, Eq)]
        #[allow(missing_docs)]
        error StorageLayoutFieldChanged(uint256 position, string expected, string found);
    }
}

/// A [`StorageLayout`] error.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// A layout declares the same field name twice.
    DuplicateField(StorageLayoutDuplicateField),
    /// A layout declares an unnamed field or an unsupported type.
    InvalidField(StorageLayoutInvalidField),
    /// A layout changes the type stored at an already used position.
    FieldChanged(StorageLayoutFieldChanged),
}

impl From<Error> for Vec<u8> {
    fn from(value: Error) -> Self {
        match value {
            Error::DuplicateField(e) => e.abi_encode(),
            Error::InvalidField(e) => e.abi_encode(),
            Error::FieldChanged(e) => e.abi_encode(),
        }
    }
}

/// Type of a persistent field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// `address`.
    Address,
    /// `bool`.
    Bool,
    /// `uintN`.
    Uint(u16),
    /// `intN`.
    Int(u16),
    /// `bytesN`.
    FixedBytes(u8),
    /// Dynamic `bytes`.
    Bytes,
    /// Dynamic `string`.
    String,
    /// `mapping(key => value)`. Entries live at
    /// [`Storage::mapping_slot`](super::Storage::mapping_slot).
    Mapping {
        /// Key type.
        key: Box<FieldType>,
        /// Value type.
        value: Box<FieldType>,
    },
    /// Dynamic array `elem[]`.
    Array(Box<FieldType>),
}

impl FieldType {
    /// `uint256`.
    pub const UINT256: FieldType = FieldType::Uint(256);
    /// `bytes32`.
    pub const BYTES32: FieldType = FieldType::FixedBytes(32);

    /// `mapping(key => value)`.
    #[must_use]
    pub fn mapping(key: FieldType, value: FieldType) -> Self {
        FieldType::Mapping { key: Box::new(key), value: Box::new(value) }
    }

    /// `elem[]`.
    #[must_use]
    pub fn array(elem: FieldType) -> Self {
        FieldType::Array(Box::new(elem))
    }

    /// Returns true if the type exists: integer widths are multiples of 8 up
    /// to 256, fixed byte lengths are 1 to 32.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            FieldType::Uint(bits) | FieldType::Int(bits) => {
                (8..=256).contains(bits) && bits % 8 == 0
            }
            FieldType::FixedBytes(len) => (1..=32).contains(len),
            FieldType::Mapping { key, value } => {
                key.is_valid() && value.is_valid()
            }
            FieldType::Array(elem) => elem.is_valid(),
            FieldType::Address
            | FieldType::Bool
            | FieldType::Bytes
            | FieldType::String => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Address => f.write_str("address"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Uint(bits) => write!(f, "uint{bits}"),
            FieldType::Int(bits) => write!(f, "int{bits}"),
            FieldType::FixedBytes(len) => write!(f, "bytes{len}"),
            FieldType::Bytes => f.write_str("bytes"),
            FieldType::String => f.write_str("string"),
            FieldType::Mapping { key, value } => {
                write!(f, "mapping({key} => {value})")
            }
            FieldType::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

/// A named persistent field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Name of the field. Only used for diagnostics and lookups; renaming a
    /// field does not affect compatibility.
    pub name: String,
    /// Type stored in the field's slot.
    pub ty: FieldType,
}

/// Ordered list of persistent fields a backend version uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    version: u32,
    #[serde(default)]
    fields: Vec<Field>,
}

impl StorageLayout {
    /// Creates an empty layout tagged with `version`.
    #[must_use]
    pub fn new(version: u32) -> Self {
        Self { version, fields: Vec::new() }
    }

    /// Appends a field to the layout.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(Field { name: name.into(), ty });
        self
    }

    /// Parses a layout from its JSON form.
    ///
    /// # Errors
    ///
    /// * [`serde_json::Error`] - If `json` is not a valid layout.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the layout to JSON.
    ///
    /// # Errors
    ///
    /// * [`serde_json::Error`] - If serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Version tag of the layout.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Fields in slot order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of positional slots the layout uses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the layout declares no field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the slot of the field called `name`.
    #[must_use]
    pub fn slot_of(&self, name: &str) -> Option<U256> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .map(U256::from)
    }

    /// Checks that the layout is well formed.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidField`] - If a field has an empty name or a type
    ///   that does not exist.
    /// * [`Error::DuplicateField`] - If two fields share a name.
    pub fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.name.is_empty() || !field.ty.is_valid() {
                return Err(Error::InvalidField(StorageLayoutInvalidField {
                    name: field.name.clone(),
                    ty: field.ty.to_string(),
                }));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::DuplicateField(
                    StorageLayoutDuplicateField { name: field.name.clone() },
                ));
            }
        }
        Ok(())
    }

    /// Checks that `next` can operate on storage written under `self`.
    ///
    /// Every position present in both layouts must hold the same type. A
    /// longer `next` appends fields; a shorter one leaves the trailing slots
    /// untouched.
    ///
    /// # Arguments
    ///
    /// * `&self` - Layout the storage was written with.
    /// * `next` - Layout of the backend about to be installed.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidField`], [`Error::DuplicateField`] - If `next` is
    ///   malformed.
    /// * [`Error::FieldChanged`] - If `next` stores a different type at a
    ///   shared position.
    pub fn check_upgrade(&self, next: &StorageLayout) -> Result<(), Error> {
        next.validate()?;

        let conflict = self
            .fields
            .iter()
            .zip(&next.fields)
            .enumerate()
            .find(|(_, (installed, proposed))| installed.ty != proposed.ty);

        if let Some((position, (installed, proposed))) = conflict {
            return Err(Error::FieldChanged(StorageLayoutFieldChanged {
                position: U256::from(position),
                expected: installed.ty.to_string(),
                found: proposed.ty.to_string(),
            }));
        }

        Ok(())
    }

    /// Returns the layout covering every slot used by `self` or `next`.
    ///
    /// Only meaningful once [`StorageLayout::check_upgrade`] accepted `next`.
    #[must_use]
    pub fn merge(&self, next: &StorageLayout) -> StorageLayout {
        if next.len() >= self.len() {
            next.clone()
        } else {
            self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{
        private::proptest::{collection::vec, prop_assert, proptest},
        uint,
    };

    use super::*;

    fn counter_v1() -> StorageLayout {
        StorageLayout::new(1).field("count", FieldType::UINT256)
    }

    fn counter_v2() -> StorageLayout {
        counter_v1()
            .field("last_caller", FieldType::Address)
            .field(
                "calls_by",
                FieldType::mapping(FieldType::Address, FieldType::UINT256),
            )
    }

    #[test]
    fn accepts_appended_fields() {
        counter_v1()
            .check_upgrade(&counter_v2())
            .expect("should accept appended fields");
    }

    #[test]
    fn accepts_prefix_of_current_layout() {
        counter_v2()
            .check_upgrade(&counter_v1())
            .expect("should accept a layout that uses fewer slots");
    }

    #[test]
    fn accepts_renamed_fields() {
        let renamed = StorageLayout::new(2).field("total", FieldType::UINT256);
        counter_v1().check_upgrade(&renamed).expect("should accept rename");
    }

    #[test]
    fn rejects_changed_type() {
        let shifted = StorageLayout::new(2)
            .field("owner", FieldType::Address)
            .field("count", FieldType::UINT256);

        let err = counter_v1()
            .check_upgrade(&shifted)
            .expect_err("should reject a changed type");

        assert_eq!(
            err,
            Error::FieldChanged(StorageLayoutFieldChanged {
                position: uint!(0_U256),
                expected: "uint256".to_string(),
                found: "address".to_string(),
            })
        );
    }

    #[test]
    fn rejects_narrowed_integer() {
        let narrowed =
            StorageLayout::new(2).field("count", FieldType::Uint(128));
        let err = counter_v1().check_upgrade(&narrowed).unwrap_err();
        assert!(matches!(err, Error::FieldChanged(_)));
    }

    #[test]
    fn rejects_duplicate_fields() {
        let layout = counter_v1().field("count", FieldType::Bool);

        let err = layout.validate().expect_err("should reject duplicates");
        assert!(matches!(
            err,
            Error::DuplicateField(StorageLayoutDuplicateField { name })
                if name == "count"
        ));

        let err = counter_v1().check_upgrade(&layout).unwrap_err();
        assert!(matches!(err, Error::DuplicateField(_)));
    }

    #[test]
    fn rejects_types_no_slot_can_hold() {
        let malformed = [
            FieldType::Uint(0),
            FieldType::Uint(7),
            FieldType::Uint(264),
            FieldType::Int(300),
            FieldType::FixedBytes(0),
            FieldType::FixedBytes(33),
            FieldType::mapping(FieldType::Address, FieldType::Uint(12)),
            FieldType::array(FieldType::FixedBytes(40)),
        ];

        for ty in malformed {
            let layout = StorageLayout::new(1).field("value", ty.clone());
            let err = layout.validate().unwrap_err();
            assert_eq!(
                err,
                Error::InvalidField(StorageLayoutInvalidField {
                    name: "value".to_string(),
                    ty: ty.to_string(),
                })
            );
        }

        for ty in [FieldType::Uint(8), FieldType::Int(256), FieldType::BYTES32] {
            StorageLayout::new(1)
                .field("value", ty)
                .validate()
                .expect("should accept valid widths");
        }
    }

    #[test]
    fn rejects_unnamed_fields() {
        let layout = StorageLayout::new(1).field("", FieldType::Bool);

        let err = layout.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidField(StorageLayoutInvalidField { name, .. })
                if name.is_empty()
        ));
    }

    #[test]
    fn finds_slots_by_name() {
        let layout = counter_v2();
        assert_eq!(layout.slot_of("count"), Some(uint!(0_U256)));
        assert_eq!(layout.slot_of("calls_by"), Some(uint!(2_U256)));
        assert_eq!(layout.slot_of("missing"), None);
    }

    #[test]
    fn merge_keeps_the_longest_layout() {
        assert_eq!(counter_v1().merge(&counter_v2()), counter_v2());
        assert_eq!(counter_v2().merge(&counter_v1()), counter_v2());
    }

    #[test]
    fn formats_types_like_solidity() {
        let ty = FieldType::mapping(
            FieldType::Address,
            FieldType::array(FieldType::BYTES32),
        );
        assert_eq!(ty.to_string(), "mapping(address => bytes32[])");
        assert_eq!(FieldType::Int(8).to_string(), "int8");
    }

    #[test]
    fn round_trips_through_json() {
        let layout = counter_v2();
        let json = layout.to_json().expect("should serialize");
        let parsed = StorageLayout::from_json(&json).expect("should parse");
        assert_eq!(parsed, layout);
    }

    #[test]
    fn encodes_errors_as_revert_data() {
        let err = Error::DuplicateField(StorageLayoutDuplicateField {
            name: "count".to_string(),
        });
        let data: Vec<u8> = err.into();
        assert_eq!(data[..4], StorageLayoutDuplicateField::SELECTOR);
    }

    #[test]
    fn any_layout_accepts_its_extensions() {
        proptest!(|(base in vec(1u16..=32, 0..8), appended in vec(1u16..=32, 0..8))| {
            let build = |bits: &[u16]| {
                bits.iter().enumerate().fold(
                    StorageLayout::new(1),
                    |layout, (i, bits)| {
                        layout.field(format!("field_{i}"), FieldType::Uint(bits * 8))
                    },
                )
            };
            let current = build(&base);
            let next = build(&[base.clone(), appended].concat());

            prop_assert!(current.check_upgrade(&next).is_ok());
            prop_assert!(next.check_upgrade(&current).is_ok());
        });
    }
}
