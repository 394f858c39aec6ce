/// Field-by-field merge of two partially specified option sets.
pub trait Overlay {
    /// Returns `self` with every field that `overrides` sets replaced.
    fn overlay(self, overrides: Self) -> Self;
}
