//! Error types shared across coursepipe components.
//!
//! Job execution errors live in [`crate::job_error`]; storage errors live in
//! the storage crate next to the gateway trait.

use uuid::Uuid;

/// Position allocation gave up after the bounded number of conflict retries.
///
/// Allocation recomputes a fresh position on every uniqueness violation rather
/// than locking the parent lesson; under pathological contention the loop is
/// bounded and surfaces this error instead of recursing forever.
#[derive(Debug, thiserror::Error)]
#[error("position allocation exhausted after {attempts} attempts for lesson {lesson_id}")]
pub struct AllocationExhausted {
    pub lesson_id: Uuid,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_exhausted_is_downcastable_from_anyhow() {
        let lesson_id = Uuid::new_v4();
        let err: anyhow::Error = AllocationExhausted {
            lesson_id,
            attempts: 5,
        }
        .into();
        let found = err.downcast_ref::<AllocationExhausted>().unwrap();
        assert_eq!(found.lesson_id, lesson_id);
        assert_eq!(found.attempts, 5);
    }
}
