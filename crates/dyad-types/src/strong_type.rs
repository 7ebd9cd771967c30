/// Define a newtype wrapper around an integer id.
///
/// The generated type derefs to the inner value, converts both ways, parses
/// from a string, and serializes transparently.
#[macro_export]
macro_rules! strong_type {
    ($name:ident, $inner:ty) => {
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

        impl ::std::str::FromStr for $name {
            type Err = ::std::num::ParseIntError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                s.trim().parse::<$inner>().map(Self)
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

    strong_type!(RankId, u32);

    #[test]
    fn test_strong_type_parse() {
        let id: RankId = " 42 ".parse().unwrap();
        assert_eq!(id, RankId(42));
        assert!("minus-one".parse::<RankId>().is_err());
    }

    #[test]
    fn test_strong_type_hash_and_order() {
        let mut set = HashSet::new();
        set.insert(RankId(1));
        set.insert(RankId(2));
        set.insert(RankId(1));
        assert_eq!(set.len(), 2);
        assert!(RankId(1) < RankId(2));
    }

    #[test]
    fn test_strong_type_serde() {
        let json = serde_json::to_string(&RankId(9)).unwrap();
        assert_eq!(json, "9");
        let parsed: RankId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RankId(9));
    }
}
