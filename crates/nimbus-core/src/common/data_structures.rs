use std::hash::Hash;
use std::ops::{Deref, DerefMut};

use fxhash::FxBuildHasher;

/// Wraps a hashbrown collection with the fx hasher so that it can be created with `new()`.
macro_rules! fx_collection {
    ($(#[$meta: meta])* $name: ident<$($param: ident),+>, $inner: ty, $item: ty, $lt: lifetime, $ref_item: ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name<$($param),+>($inner)
        where
            K: Eq + Hash;

        impl<$($param),+> $name<$($param),+>
        where
            K: Eq + Hash,
        {
            #[inline]
            pub fn new() -> Self {
                Self(Default::default())
            }
        }

        impl<$($param),+> Default for $name<$($param),+>
        where
            K: Eq + Hash,
        {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<$($param),+> Deref for $name<$($param),+>
        where
            K: Eq + Hash,
        {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<$($param),+> DerefMut for $name<$($param),+>
        where
            K: Eq + Hash,
        {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl<$($param),+> FromIterator<$item> for $name<$($param),+>
        where
            K: Eq + Hash,
        {
            fn from_iter<I: IntoIterator<Item = $item>>(iter: I) -> Self {
                Self(iter.into_iter().collect())
            }
        }

        impl<$lt, $($param),+> IntoIterator for &$lt $name<$($param),+>
        where
            K: Eq + Hash,
        {
            type Item = $ref_item;
            type IntoIter = <&$lt $inner as IntoIterator>::IntoIter;

            #[inline]
            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }
    };
}

fx_collection!(
    /// Hash map with unspecified iteration order, never iterate it where order is observable.
    Map<K, V>,
    hashbrown::HashMap<K, V, FxBuildHasher>,
    (K, V),
    'a,
    (&'a K, &'a V)
);

fx_collection!(
    Set<K>,
    hashbrown::HashSet<K, FxBuildHasher>,
    K,
    'a,
    &'a K
);

#[cfg(test)]
mod tests {
    use super::{Map, Set};

    #[test]
    fn collect_and_iterate() {
        let map: Map<u32, &str> = [(1, "a"), (2, "b")].into_iter().collect();
        assert_eq!(map.get(&2), Some(&"b"));
        let mut keys: Vec<u32> = (&map).into_iter().map(|(k, _)| *k).collect();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);

        let mut set = Set::new();
        assert!(set.insert("x"));
        assert!(!set.insert("x"));
        assert_eq!(set.len(), 1);
    }
}
