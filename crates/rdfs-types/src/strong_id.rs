/// Declares a transparent newtype around a primitive identifier.
///
/// The generated type derives the full comparison/hash/serde set the
/// registry and wire types rely on, dereferences to the inner value, and
/// converts both ways with `From`.
#[macro_export]
macro_rules! strong_id {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl ::std::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(val: $inner) -> Self {
                Self(val)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    strong_id!(TestId, u64);

    #[test]
    fn test_strong_id_basic() {
        let id = TestId(7);
        assert_eq!(*id, 7u64);
        assert_eq!(format!("{}", id), "7");
        assert_eq!(format!("{:?}", id), "TestId(7)");
    }

    #[test]
    fn test_strong_id_conversions() {
        let id: TestId = 42u64.into();
        let raw: u64 = id.into();
        assert_eq!(raw, 42);
    }

    #[test]
    fn test_strong_id_ord_and_hash() {
        assert!(TestId(1) < TestId(2));
        let mut set = HashSet::new();
        set.insert(TestId(1));
        set.insert(TestId(1));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_strong_id_serde() {
        let id = TestId(99);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "99");
        let back: TestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
