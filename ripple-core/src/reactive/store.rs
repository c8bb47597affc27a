//! Store Proxies
//!
//! A [`Proxy`] makes in-place mutation of a shared container observable.
//! Reads through the proxy are tracked like cell reads; mutations through
//! the proxy bump its version and schedule dependents.
//!
//! Each source object is wrapped at most once. Wrapping the same
//! `Rc<RefCell<T>>` again returns a handle to the same proxy, so proxies
//! compare equal by identity and can be stored in a [`Cell`](super::Cell)
//! without spurious change notifications.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::{try_with_runtime, with_runtime};
use crate::error::{raise, Result};
use crate::graph::NodeId;

thread_local! {
    /// Source object address -> live proxy for it.
    static PROXIES: RefCell<HashMap<usize, Weak<dyn Any>>> = RefCell::new(HashMap::new());
}

fn address<T>(source: &Rc<RefCell<T>>) -> usize {
    Rc::as_ptr(source) as *const () as usize
}

struct ProxyInner<T> {
    id: NodeId,
    source: Rc<RefCell<T>>,
}

impl<T> Drop for ProxyInner<T> {
    fn drop(&mut self) {
        let key = address(&self.source);
        let _ = PROXIES.try_with(|table| {
            if let Ok(mut table) = table.try_borrow_mut() {
                // Only forget the entry if it still points at a dead proxy.
                let stale = table.get(&key).map_or(false, |weak| weak.strong_count() == 0);
                if stale {
                    table.remove(&key);
                }
            }
        });
        let id = self.id;
        try_with_runtime(|rt| rt.release(id));
    }
}

/// Observable view of a shared container.
///
/// # Example
///
/// ```rust,ignore
/// let todos = Rc::new(RefCell::new(vec!["write docs"]));
/// let store = wrap(&todos);
///
/// let count = Derived::new({
///     let store = store.clone();
///     move || store.read(|todos| todos.len())
/// });
///
/// store.update(|todos| todos.push("ship"));
/// assert_eq!(count.get(), 2);
/// assert!(wrap(&todos) == store);
/// ```
pub struct Proxy<T: 'static> {
    inner: Rc<ProxyInner<T>>,
}

/// Wrap a shared container, reusing the existing proxy for it if there is
/// one.
pub fn wrap<T: 'static>(source: &Rc<RefCell<T>>) -> Proxy<T> {
    let key = address(source);

    let existing = PROXIES.with(|table| {
        table
            .borrow()
            .get(&key)
            .and_then(Weak::upgrade)
            .and_then(|any| any.downcast::<ProxyInner<T>>().ok())
    });
    if let Some(inner) = existing {
        if with_runtime(|rt| rt.is_alive(inner.id)) {
            return Proxy { inner };
        }
    }

    let id = NodeId::new();
    with_runtime(|rt| rt.register_source(id));
    let inner = Rc::new(ProxyInner {
        id,
        source: Rc::clone(source),
    });
    let any: Rc<dyn Any> = inner.clone();
    PROXIES.with(|table| table.borrow_mut().insert(key, Rc::downgrade(&any)));
    trace!(proxy = %id, "wrapped source object");

    Proxy { inner }
}

impl<T: 'static> Proxy<T> {
    /// Get the proxy's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The wrapped source object.
    pub fn source(&self) -> Rc<RefCell<T>> {
        Rc::clone(&self.inner.source)
    }

    /// Borrow the container, tracking the read.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_runtime(|rt| rt.track(self.inner.id));
        f(&*self.inner.source.borrow())
    }

    /// Mutate the container in place and notify dependents.
    ///
    /// Mutations made directly through the source `Rc` bypass the proxy and
    /// are not observed.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let id = self.inner.id;
        with_runtime(|rt| rt.check_writable(id))?;

        let result = f(&mut *self.inner.source.borrow_mut());

        trace!(proxy = %id, "store mutated");
        with_runtime(|rt| rt.notify_changed(id));
        Ok(result)
    }

    /// Mutate the container in place and notify dependents.
    ///
    /// # Panics
    ///
    /// Panics with the [`ReactiveError`](crate::ReactiveError) when
    /// [`try_update`](Self::try_update) would fail.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        match self.try_update(f) {
            Ok(result) => result,
            Err(err) => raise(err),
        }
    }

    /// Current version, or `None` once the proxy's node has been disposed.
    pub fn version(&self) -> Option<u64> {
        with_runtime(|rt| rt.version(self.inner.id))
    }

    /// Check whether two proxies are the same proxy.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Proxy<T> {
    /// Clone the container out, tracking the read.
    pub fn get(&self) -> T {
        self.read(T::clone)
    }
}

impl<T: 'static> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for Proxy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: 'static> Eq for Proxy<T> {}

impl<T> Debug for Proxy<T>
where
    T: Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.source.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_effect, create_root, flush, Cell, Derived};

    #[test]
    fn wrapping_twice_preserves_identity() {
        let source = Rc::new(RefCell::new(vec![1, 2, 3]));
        let a = wrap(&source);
        let b = wrap(&source);

        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());

        let other = wrap(&Rc::new(RefCell::new(vec![1, 2, 3])));
        assert_ne!(a, other);
    }

    #[test]
    fn mutation_through_proxy_is_observed() {
        let source = Rc::new(RefCell::new(vec![1]));
        let store = wrap(&source);

        let len = Derived::new({
            let store = store.clone();
            move || store.read(|items| items.len())
        });
        assert_eq!(len.get(), 1);

        store.update(|items| items.push(2));
        assert_eq!(len.get(), 2);
        assert_eq!(store.version(), Some(1));
        assert_eq!(*source.borrow(), vec![1, 2]);
    }

    #[test]
    fn effect_sees_nested_field_mutation() {
        #[derive(Debug, Default)]
        struct Profile {
            name: String,
        }

        let store = wrap(&Rc::new(RefCell::new(Profile::default())));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _effect = create_effect({
            let store = store.clone();
            let seen = seen.clone();
            move || seen.borrow_mut().push(store.read(|p| p.name.clone()))
        });

        flush().unwrap();
        store.update(|p| p.name = "ada".to_string());
        flush().unwrap();

        assert_eq!(*seen.borrow(), vec!["".to_string(), "ada".to_string()]);
    }

    #[test]
    fn cell_holding_same_proxy_does_not_notify() {
        let source = Rc::new(RefCell::new(0u8));
        let cell = Cell::new(wrap(&source));

        cell.set(wrap(&source));
        assert_eq!(cell.version(), Some(0));
    }

    #[test]
    fn dropping_last_handle_forgets_the_entry() {
        let source = Rc::new(RefCell::new(String::new()));
        let first_id = wrap(&source).id();
        let second_id = wrap(&source).id();
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn rewrapping_after_disposal_creates_a_fresh_proxy() {
        let source = Rc::new(RefCell::new(1));
        let stale = create_root(|dispose| {
            let proxy = wrap(&source);
            dispose.dispose();
            proxy
        });
        assert!(stale.try_update(|v| *v += 1).is_err());

        let fresh = wrap(&source);
        assert_ne!(fresh, stale);
        fresh.update(|v| *v += 1);
        assert_eq!(*source.borrow(), 2);
    }
}
