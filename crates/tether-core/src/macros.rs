//! Declarative persistent classes.

/// Declare a persistent record type.
///
/// ```
/// use tether_core::{persistent_class, Persistent};
///
/// persistent_class! {
///     /// A ship in the fleet.
///     pub struct Ship {
///         name,
///         cargo,
///     }
///     transient {
///         pub selected: bool,
///     }
/// }
///
/// let spec = Ship::declare().unwrap();
/// assert_eq!(spec.fields(), ["name", "cargo"]);
/// ```
///
/// The generated struct wraps a [`Record`](crate::Record) and gets:
/// - one accessor per field returning a [`FieldHandle`](crate::FieldHandle);
/// - the listed transient attributes as plain struct fields, set to their
///   `Default` whenever a record is wrapped and never persisted;
/// - a [`Persistent`](crate::Persistent) impl whose class name is the
///   struct name.
///
/// `extends Parent` inherits the parent's fields. The subclass derefs to
/// a `Parent` view of the same record, so inherited accessors work on it
/// directly. Redeclaring an inherited field fails with
/// `DuplicateFieldOverride` when the class is registered. Transient
/// attribute types must be `Clone + Debug + Default`.
#[macro_export]
macro_rules! persistent_class {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident $(extends $parent:ty)? {
            $( $(#[$field_meta:meta])* $field:ident ),* $(,)?
        }
        $(
            transient {
                $( $(#[$transient_meta:meta])* $transient_vis:vis $transient:ident : $transient_ty:ty ),* $(,)?
            }
        )?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            $( base: $parent, )?
            record: $crate::Record,
            $($( $(#[$transient_meta])* $transient_vis $transient: $transient_ty, )*)?
        }

        impl $name {
            $(
                $(#[$field_meta])*
                pub fn $field(&self) -> $crate::FieldHandle<'_> {
                    self.record.field(stringify!($field))
                }
            )*
        }

        impl $crate::Persistent for $name {
            const CLASS: &'static str = stringify!($name);

            fn declare() -> $crate::CoreResult<$crate::ClassSpec> {
                let builder = $crate::ClassSpec::builder(Self::CLASS);
                $( let builder = builder.extends(&<$parent as $crate::Persistent>::declare()?); )?
                let fields: &[&str] = &[$( stringify!($field) ),*];
                builder.fields(fields.iter().copied()).build()
            }

            fn from_record(record: $crate::Record) -> Self {
                Self {
                    $( base: <$parent as $crate::Persistent>::from_record(record.clone()), )?
                    record,
                    $($( $transient: ::core::default::Default::default(), )*)?
                }
            }

            fn record(&self) -> &$crate::Record {
                &self.record
            }
        }

        $(
            impl ::core::ops::Deref for $name {
                type Target = $parent;

                fn deref(&self) -> &$parent {
                    &self.base
                }
            }
        )?
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_types::EntityId;

    use crate::context::testing::RecordingHook;
    use crate::error::CoreError;
    use crate::record::{Persistent, Record};
    use crate::value::Value;

    persistent_class! {
        struct Sector {
            name,
            warps,
        }
    }

    persistent_class! {
        /// Sector with a port.
        struct PortSector extends Sector {
            port_class,
        }
        transient {
            visits: u32,
        }
    }

    persistent_class! {
        struct Empty {}
    }

    persistent_class! {
        struct Clash extends Sector {
            name,
        }
    }

    fn wrap<T: Persistent>() -> T {
        let hook = Arc::new(RecordingHook::default());
        let spec = Arc::new(T::declare().unwrap());
        T::from_record(Record::new(EntityId::new(1), spec, hook))
    }

    #[test]
    fn declares_fields_in_order() {
        assert_eq!(Sector::CLASS, "Sector");
        assert_eq!(Sector::declare().unwrap().fields(), ["name", "warps"]);
        assert!(Empty::declare().unwrap().fields().is_empty());
    }

    #[test]
    fn subclass_inherits_fields() {
        let spec = PortSector::declare().unwrap();
        assert_eq!(spec.fields(), ["name", "warps", "port_class"]);
        assert!(spec.is_a("Sector"));
    }

    #[test]
    fn redeclared_field_is_rejected() {
        assert!(matches!(
            Clash::declare(),
            Err(CoreError::DuplicateFieldOverride { ref field, .. }) if field == "name"
        ));
    }

    #[test]
    fn accessors_read_and_write_fields() {
        let sector: Sector = wrap();
        sector.name().set("Sol").unwrap();
        assert_eq!(sector.name().get().unwrap(), Value::from("Sol"));
        assert!(sector.warps().get().unwrap().is_unset());
        assert_eq!(sector.name().name(), "name");
    }

    #[test]
    fn subclass_reaches_inherited_accessors() {
        let port: PortSector = wrap();
        port.name().set("Vega").unwrap();
        port.port_class().set(2).unwrap();
        assert_eq!(port.name().get().unwrap(), Value::from("Vega"));
        assert_eq!(port.record().get("name").unwrap(), Value::from("Vega"));
        assert!(port.warps().get().unwrap().is_unset());
        assert_eq!(
            port.record().context().dirty_fields().len(),
            2,
            "inherited and own fields share one context"
        );
    }

    #[test]
    fn transient_fields_are_not_persistent() {
        let mut port: PortSector = wrap();
        assert_eq!(port.visits, 0);
        port.visits += 1;
        assert!(!port.record().has_field("visits"));
        assert!(!port.record().context().is_dirty());
    }

    #[test]
    fn cast_checks_class() {
        let port: PortSector = wrap();
        let as_sector = Sector::cast(port.record().clone()).unwrap();
        as_sector.name().set("Terra").unwrap();
        assert_eq!(port.name().get().unwrap(), Value::from("Terra"));
        port.port_class().set(3).unwrap();

        let sector: Sector = wrap();
        assert!(matches!(
            PortSector::cast(sector.record().clone()),
            Err(CoreError::ClassMismatch { .. })
        ));
    }
}
