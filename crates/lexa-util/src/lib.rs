// repetition bounds, where `Infinite` is the open upper end of `{m,}`, `*` and `+`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RangeUInt {
    Finite(u32),
    Infinite,
}

/// Declares a `u32` newtype used to index an arena (`Vec<$type_name>`).
///
/// The generated type implements `Index`/`IndexMut` on both slices and vectors
/// of the element type, so arenas can be indexed without `as usize` casts.
#[macro_export]
macro_rules! make_type_idx {
    ($vis:vis $type_idx_name:ident, $type_name:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $type_idx_name(u32);

        impl $type_idx_name {
            $vis fn from_push(vec: &mut Vec<$type_name>, val: $type_name) -> $type_idx_name {
                let idx = $type_idx_name(vec.len() as u32);
                vec.push(val);
                idx
            }

            $vis fn new(index: usize) -> $type_idx_name {
                $type_idx_name(u32::try_from(index).expect("arena index overflows u32"))
            }

            $vis fn index(self) -> usize {
                self.0 as usize
            }

            $vis fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $type_idx_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::ops::Index<$type_idx_name> for [$type_name] {
            type Output = $type_name;

            fn index(&self, index: $type_idx_name) -> &Self::Output {
                &self[index.0 as usize]
            }
        }

        impl std::ops::IndexMut<$type_idx_name> for [$type_name] {
            fn index_mut(&mut self, index: $type_idx_name) -> &mut Self::Output {
                &mut self[index.0 as usize]
            }
        }

        impl std::ops::Index<$type_idx_name> for Vec<$type_name> {
            type Output = $type_name;

            fn index(&self, index: $type_idx_name) -> &Self::Output {
                std::ops::Index::index(self.as_slice(), index)
            }
        }

        impl std::ops::IndexMut<$type_idx_name> for Vec<$type_name> {
            fn index_mut(&mut self, index: $type_idx_name) -> &mut Self::Output {
                std::ops::IndexMut::index_mut(self.as_mut_slice(), index)
            }
        }
    };
}
