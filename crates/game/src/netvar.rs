use std::ops::Deref;

/// A replicated field that remembers whether it changed since the last
/// replication flush.
///
/// `set` only marks the value dirty when it actually changes, `edit` always
/// does. Reading never touches the flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetVar<T> {
    value: T,
    dirty: bool,
}

impl<T> NetVar<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Mutable access that forces a resend, even if the caller ends up
    /// writing the same value back.
    #[inline]
    pub fn edit(&mut self) -> &mut T {
        self.dirty = true;
        &mut self.value
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Only the replication commit should call this, once the value is in
    /// an outgoing message.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Writes a value received from the authority. The value is committed,
    /// so it is not dirty afterwards.
    pub fn apply_remote(&mut self, value: T) {
        self.value = value;
        self.dirty = false;
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: PartialEq> NetVar<T> {
    pub fn set(&mut self, value: T) {
        if self.value != value {
            self.value = value;
            self.dirty = true;
        }
    }
}

impl<T: Copy> NetVar<T> {
    #[inline]
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T> Deref for NetVar<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> From<T> for NetVar<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn set_same_value_stays_clean() {
        let mut var = NetVar::new(5_i32);
        var.set(5);
        assert!(!var.is_dirty());

        var.set(6);
        assert!(var.is_dirty());
        assert_eq!(var.value(), 6);
    }

    #[test]
    fn edit_always_marks_dirty() {
        let mut var = NetVar::new(Vec3::ZERO);
        *var.edit() = Vec3::ZERO;
        assert!(var.is_dirty());
    }

    #[test]
    fn reads_do_not_clear() {
        let mut var = NetVar::new(1.0_f32);
        var.set(2.0);
        let _ = var.get();
        let _ = *var;
        assert!(var.is_dirty());

        var.clear_dirty();
        assert!(!var.is_dirty());
    }

    #[test]
    fn remote_write_is_clean() {
        let mut var = NetVar::new(String::new());
        var.apply_remote("models/player.glb".to_string());
        assert!(!var.is_dirty());
        assert_eq!(var.get(), "models/player.glb");
    }
}
