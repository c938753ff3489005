/// Three-state edit of an optional issue field.
///
/// A partial update needs to tell "leave it alone" apart from "remove the
/// value", which `Option<T>` alone cannot express.
///
/// ```
/// use tracker_domain::FieldUpdate;
///
/// let mut estimate = Some(3.0);
/// FieldUpdate::Set(5.0).apply_to(&mut estimate);
/// assert_eq!(estimate, Some(5.0));
///
/// FieldUpdate::<f64>::Keep.apply_to(&mut estimate);
/// assert_eq!(estimate, Some(5.0));
///
/// FieldUpdate::<f64>::Clear.apply_to(&mut estimate);
/// assert_eq!(estimate, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldUpdate<T> {
    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(value) => *field = Some(value),
            FieldUpdate::Clear => *field = None,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, FieldUpdate::Keep)
    }

    /// The value being set, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Clear,
        }
    }
}
