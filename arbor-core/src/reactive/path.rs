//! Field Paths
//!
//! A field path names a location inside a model's state. The change registrar
//! records paths on read and compares them on write, and connections use them
//! to decide which child stores mirror a mutated parent field.
//!
//! Paths are explicit tokens built from [`Segment`]s rather than derived from
//! memory layout. A [`Field`] pairs a path with the accessors that reach the
//! value it names, so reading and writing through a `Field` always reports the
//! same path the registrar sees.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

/// One step in a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// A named struct field.
    Name(&'static str),
    /// A position in a sequence.
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Name(name) => f.write_str(name),
            Segment::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// A location inside a state value, from the root down.
///
/// The empty path is the root: it names the whole state.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(SmallVec<[Segment; 4]>);

impl FieldPath {
    /// The path naming the whole state.
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// A single named segment.
    pub fn key(name: &'static str) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Segment::Name(name));
        Self(segments)
    }

    /// A path made of named segments, outermost first.
    pub fn from_names(names: &[&'static str]) -> Self {
        Self(names.iter().copied().map(Segment::Name).collect())
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// This path extended by an index segment.
    pub fn index(&self, index: usize) -> Self {
        self.child(Segment::Index(index))
    }

    /// This path followed by `other`.
    pub fn join(&self, other: &FieldPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The enclosing path, or `None` for the root.
    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.is_empty() {
            return None;
        }
        let mut segments = self.0.clone();
        segments.pop();
        Some(Self(segments))
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True when a write at one path can change the value read at the other.
    ///
    /// Writing `user` changes what `user.name` reads, and writing `user.name`
    /// changes what `user` reads, so overlap is symmetric.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }

    /// The remainder of `self` below `prefix`, if `prefix` is an ancestor.
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        if prefix.is_prefix_of(self) {
            Some(Self(self.0[prefix.0.len()..].iter().cloned().collect()))
        } else {
            None
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Name(name) if i > 0 => write!(f, ".{name}")?,
                other => write!(f, "{other}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

impl From<&'static str> for FieldPath {
    fn from(name: &'static str) -> Self {
        Self::key(name)
    }
}

impl serde::Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

type Getter<S, V> = Arc<dyn Fn(&S) -> &V + Send + Sync>;
type Setter<S, V> = Arc<dyn Fn(&mut S) -> &mut V + Send + Sync>;

/// A typed accessor for one field of a state value.
///
/// Build one with the [`field!`](crate::field) macro:
///
/// ```rust,ignore
/// let count = field!(CounterState => count);
/// ctx.set(&count, 3)?;
/// ```
pub struct Field<S, V> {
    path: FieldPath,
    get: Getter<S, V>,
    get_mut: Setter<S, V>,
}

impl<S: 'static, V: 'static> Field<S, V> {
    /// Create a field from its path and accessors.
    pub fn new<G, M>(path: impl Into<FieldPath>, get: G, get_mut: M) -> Self
    where
        G: Fn(&S) -> &V + Send + Sync + 'static,
        M: Fn(&mut S) -> &mut V + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            get: Arc::new(get),
            get_mut: Arc::new(get_mut),
        }
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn get<'a>(&self, state: &'a S) -> &'a V {
        (self.get)(state)
    }

    pub fn get_mut<'a>(&self, state: &'a mut S) -> &'a mut V {
        (self.get_mut)(state)
    }

    /// A field reaching `inner` through this one.
    pub fn then<W: 'static>(&self, inner: &Field<V, W>) -> Field<S, W> {
        let (outer_get, inner_get) = (Arc::clone(&self.get), Arc::clone(&inner.get));
        let (outer_mut, inner_mut) = (Arc::clone(&self.get_mut), Arc::clone(&inner.get_mut));
        Field::new(
            self.path.join(&inner.path),
            move |state: &S| inner_get(outer_get(state)),
            move |state: &mut S| inner_mut(outer_mut(state)),
        )
    }
}

impl<S: 'static> Field<S, S> {
    /// The field naming the whole state.
    pub fn root() -> Self {
        Field::new(FieldPath::root(), |state: &S| state, |state: &mut S| state)
    }
}

impl<S, V> Clone for Field<S, V> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            get: Arc::clone(&self.get),
            get_mut: Arc::clone(&self.get_mut),
        }
    }
}

impl<S, V> fmt::Debug for Field<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("path", &self.path).finish()
    }
}

/// Build a [`Field`] for a (possibly nested) named field of a state type.
///
/// ```rust,ignore
/// let name = field!(ProfileState => user.name);
/// assert_eq!(name.path().to_string(), "user.name");
/// ```
#[macro_export]
macro_rules! field {
    ($state:ty => $($name:ident).+) => {
        $crate::Field::<$state, _>::new(
            $crate::FieldPath::from_names(&[$(stringify!($name)),+]),
            |state: &$state| &state.$($name).+,
            |state: &mut $state| &mut state.$($name).+,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Profile {
        user: User,
        visits: u32,
    }

    #[test]
    fn prefix_and_overlap() {
        let user = FieldPath::key("user");
        let name = FieldPath::from_names(&["user", "name"]);
        let visits = FieldPath::key("visits");

        assert!(user.is_prefix_of(&name));
        assert!(!name.is_prefix_of(&user));
        assert!(user.overlaps(&name));
        assert!(name.overlaps(&user));
        assert!(!name.overlaps(&visits));
        assert!(FieldPath::root().overlaps(&visits));
    }

    #[test]
    fn strip_prefix_yields_remainder() {
        let name = FieldPath::from_names(&["user", "name"]);
        let user = FieldPath::key("user");

        assert_eq!(name.strip_prefix(&user), Some(FieldPath::key("name")));
        assert_eq!(user.strip_prefix(&user), Some(FieldPath::root()));
        assert_eq!(user.strip_prefix(&name), None);
    }

    #[test]
    fn display_joins_segments() {
        let path = FieldPath::from_names(&["rows"]).index(2).child(Segment::Name("title"));
        assert_eq!(path.to_string(), "rows[2].title");
        assert_eq!(FieldPath::root().to_string(), "<root>");
        assert_eq!(path.parent().map(|p| p.to_string()), Some("rows[2]".to_string()));
    }

    #[test]
    fn field_macro_reads_and_writes_nested_values() {
        let name = field!(Profile => user.name);
        let mut profile = Profile::default();

        *name.get_mut(&mut profile) = "ada".to_string();

        assert_eq!(name.get(&profile), "ada");
        assert_eq!(name.path().to_string(), "user.name");
    }

    #[test]
    fn composed_fields_extend_the_path() {
        let user = field!(Profile => user);
        let age = field!(User => age);
        let profile_age = user.then(&age);

        let mut profile = Profile::default();
        *profile_age.get_mut(&mut profile) = 36;

        assert_eq!(profile.user.age, 36);
        assert_eq!(profile_age.path(), &FieldPath::from_names(&["user", "age"]));
    }
}
