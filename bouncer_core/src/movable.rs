/// A field that a type implementing `Drop` can still give away.
///
/// Holds a value from construction until [`take`](Self::take) empties it;
/// after that, [`as_ref`](Self::as_ref) returns `None`.
#[derive(Debug)]
pub enum Movable<T> {
    Empty,
    Full(T),
}

impl<T> Movable<T> {
    pub fn new(obj: T) -> Self {
        Self::Full(obj)
    }

    pub fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Empty) {
            Self::Empty => None,
            Self::Full(value) => Some(value),
        }
    }

    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Self::Empty => None,
            Self::Full(value) => Some(value),
        }
    }
}
