use std::cmp::Ordering;

/// Orders elements of a list and decides which of them count as duplicates.
pub trait Compare<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// Orders elements by their `Ord` implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<T: Ord> Compare<T> for NaturalOrder {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

impl<T, F> Compare<T> for F
where F: Fn(&T, &T) -> Ordering
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self(a, b)
    }
}

/// Behaviour of a `List`, fixed when the list is built.
///
/// # Examples
/// ```
/// use rustcurrent::structures::ListConfig;
/// let config = ListConfig::default().with_sorted(false).with_duplicates(true);
/// assert!(!config.sorted);
/// assert!(config.opacity);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListConfig {
    /// Keep elements in comparator order; lookups stop early once past the key.
    pub sorted: bool,
    /// Allow several elements that compare equal.
    pub duplicates: bool,
    /// Stamp the size version with commit timestamps instead of bumping it.
    pub opacity: bool
}

impl ListConfig {
    pub fn with_sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    pub fn with_duplicates(mut self, duplicates: bool) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn with_opacity(mut self, opacity: bool) -> Self {
        self.opacity = opacity;
        self
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        ListConfig {
            sorted: true,
            duplicates: false,
            opacity: true
        }
    }
}
