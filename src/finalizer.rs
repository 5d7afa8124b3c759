//! Finalizer-list helpers shared by the dispatcher and the optional
//! `kube-client` adapters.

use crate::resource::ReconcileTarget;

/// The package-wide default finalizer name, used unless a controller
/// registers its own.
pub const DEFAULT_FINALIZER: &str = "kube-reconcile-core/finalizer";

/// `true` iff `finalizer` appears in `target`'s finalizer list.
pub fn contains<T: ReconcileTarget>(target: &T, finalizer: &str) -> bool {
    target.finalizers().iter().any(|f| f == finalizer)
}

/// Appends `finalizer` to `target`'s finalizer list unless already present.
/// Returns whether the list was actually mutated.
pub fn add<T: ReconcileTarget>(target: &mut T, finalizer: &str) -> bool {
    if contains(target, finalizer) {
        return false;
    }
    target.finalizers_mut().push(finalizer.to_owned());
    true
}

/// Removes `finalizer` from `target`'s finalizer list. Returns whether the
/// list was actually mutated.
pub fn remove<T: ReconcileTarget>(target: &mut T, finalizer: &str) -> bool {
    let finalizers = target.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}
