use std::sync::Mutex;

/// Événement qui déclenche la libération d'un process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Sortie lue jusqu'au bout et fin du process observée.
    Completed,
    /// Fin du process observée par le superviseur, sortie pas forcément lue.
    Exited,
    /// Arrêt demandé par le consommateur.
    Stopped,
    /// Flux abandonné sans arrêt explicite.
    Dropped,
    /// Fin du process en échec, délai dépassé ou erreur de lecture.
    Failed,
}

/// Garde de libération à usage unique.
///
/// Conserve les ressources à libérer jusqu'au premier appel de `release`;
/// les appels suivants, y compris concurrents, ne retournent rien.
#[derive(Debug)]
pub struct ReleaseOnce<T> {
    slot: Mutex<Option<T>>,
}

impl<T> ReleaseOnce<T> {
    pub fn new(resources: T) -> Self {
        Self {
            slot: Mutex::new(Some(resources)),
        }
    }

    /// Retourne les ressources au premier appel seulement.
    pub fn release(&self, reason: ReleaseReason) -> Option<T> {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let resources = slot.take();
        if resources.is_some() {
            log::debug!("[poppler][process] release ({reason:?})");
        }
        resources
    }

    pub fn is_released(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn second_release_is_a_no_op() {
        let guard = ReleaseOnce::new("channels");
        assert!(!guard.is_released());
        assert_eq!(guard.release(ReleaseReason::Completed), Some("channels"));
        assert!(guard.is_released());
        assert_eq!(guard.release(ReleaseReason::Stopped), None);
        assert_eq!(guard.release(ReleaseReason::Failed), None);
    }

    #[test]
    fn every_trigger_order_releases_once() {
        let reasons = [
            ReleaseReason::Completed,
            ReleaseReason::Exited,
            ReleaseReason::Stopped,
            ReleaseReason::Failed,
            ReleaseReason::Dropped,
        ];
        for first in reasons {
            for second in reasons {
                for third in reasons {
                    let guard = ReleaseOnce::new(());
                    let released = [first, second, third]
                        .into_iter()
                        .filter(|reason| guard.release(*reason).is_some())
                        .count();
                    assert_eq!(released, 1, "{first:?} {second:?} {third:?}");
                }
            }
        }
    }

    #[test]
    fn racing_threads_release_once() {
        for _ in 0..50 {
            let guard = Arc::new(ReleaseOnce::new(()));
            let winners = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = [
                ReleaseReason::Completed,
                ReleaseReason::Exited,
                ReleaseReason::Stopped,
                ReleaseReason::Failed,
                ReleaseReason::Dropped,
            ]
            .into_iter()
            .map(|reason| {
                let guard = Arc::clone(&guard);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if guard.release(reason).is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
