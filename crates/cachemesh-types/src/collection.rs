//! Collection command arguments.

use std::fmt::{self, Display};

/// Arguments of a list get: a single index or an index range, optionally
/// deleting the fetched elements.
///
/// When deletion is requested the rendering ends with `drop` if an emptied
/// list should be removed as well, otherwise with `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListGet {
    from: i32,
    to: Option<i32>,
    delete: bool,
    drop_if_empty: bool,
}

impl ListGet {
    /// Gets the element at `index`; `delete` removes it (and drops an
    /// emptied list).
    pub fn index(index: i32, delete: bool) -> Self {
        Self {
            from: index,
            to: None,
            delete,
            drop_if_empty: true,
        }
    }

    /// Gets the elements between `from` and `to` inclusive.
    pub fn range(from: i32, to: i32, delete: bool) -> Self {
        Self {
            from,
            to: Some(to),
            delete,
            drop_if_empty: true,
        }
    }

    /// Overrides whether a list emptied by the delete is dropped.
    pub fn drop_if_empty(mut self, drop_if_empty: bool) -> Self {
        self.drop_if_empty = drop_if_empty;
        self
    }

    pub fn stringify(&self) -> String {
        self.to_string()
    }
}

impl Display for ListGet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "{}..{}", self.from, to)?,
            None => write!(f, "{}", self.from)?,
        }

        if self.delete {
            if self.drop_if_empty {
                f.write_str(" drop")?;
            } else {
                f.write_str(" delete")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ListGet::index(10, true), "10 drop" ; "index delete default drop")]
    #[test_case(ListGet::index(10, false), "10" ; "index no delete")]
    #[test_case(ListGet::index(10, true).drop_if_empty(true), "10 drop" ; "index delete drop")]
    #[test_case(ListGet::index(10, true).drop_if_empty(false), "10 delete" ; "index delete keep")]
    #[test_case(ListGet::index(10, false).drop_if_empty(true), "10" ; "index no delete drop")]
    #[test_case(ListGet::index(10, false).drop_if_empty(false), "10" ; "index no delete keep")]
    #[test_case(ListGet::range(10, 20, true), "10..20 drop" ; "range delete default drop")]
    #[test_case(ListGet::range(10, 20, false), "10..20" ; "range no delete")]
    #[test_case(ListGet::range(10, 20, true).drop_if_empty(false), "10..20 delete" ; "range delete keep")]
    #[test_case(ListGet::range(10, 20, true).drop_if_empty(true), "10..20 drop" ; "range delete drop")]
    #[test_case(ListGet::range(10, 20, false).drop_if_empty(true), "10..20" ; "range no delete drop")]
    #[test_case(ListGet::range(10, 20, false).drop_if_empty(false), "10..20" ; "range no delete keep")]
    fn stringify(args: ListGet, expected: &str) {
        assert_eq!(args.stringify(), expected);
    }
}
