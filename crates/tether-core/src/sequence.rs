//! Persistence-aware ordered sequence.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

use tether_types::{EntityId, FieldKey};

use crate::context::{Cache, Context};
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// An ordered sequence whose items are the fields of its own context.
///
/// Item `i` is stored under field key `i`. Every structural change marks
/// exactly the indices whose stored cell changes:
///
/// | operation | dirty indices |
/// |---|---|
/// | `append`, `extend`, `repeat` | the new indices only |
/// | `set` | the one index |
/// | `insert` | insertion point to the new end |
/// | `delete`, `pop`, `remove` | deletion point to the old end |
/// | `sort`, `reverse`, `clear` | the whole current range |
///
/// Indices past the new end stay dirty so the backend deletes their rows.
///
/// Handles are cheap to clone and compare by identity.
#[derive(Clone)]
pub struct Sequence {
    ctx: Context,
}

fn span(range: Range<usize>) -> Vec<FieldKey> {
    range.map(FieldKey::index).collect()
}

fn out_of_range(index: usize, len: usize) -> CoreError {
    CoreError::IndexOutOfRange { index, len }
}

impl Sequence {
    pub(crate) fn from_context(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn id(&self) -> EntityId {
        self.ctx.id()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ctx.ptr_eq(&other.ctx)
    }

    fn read<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        self.ctx.read(|cache| match cache {
            Cache::Items(items) => f(items),
            _ => f(&[]),
        })
    }

    fn modify<R>(
        &self,
        f: impl FnOnce(&mut Vec<Value>) -> CoreResult<(R, Vec<FieldKey>)>,
    ) -> CoreResult<R> {
        let type_tag = self.ctx.type_tag();
        self.ctx.update(|cache| match cache {
            Cache::Items(items) => f(items),
            _ => Err(CoreError::ClassMismatch {
                expected: "sequence".to_string(),
                found: type_tag.to_string(),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.read(<[Value]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> CoreResult<Value> {
        self.read(|items| {
            items
                .get(index)
                .cloned()
                .ok_or_else(|| out_of_range(index, items.len()))
        })
    }

    /// Snapshot of the current items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.read(<[Value]>::to_vec)
    }

    /// Position of the first item equal to `value`.
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.read(|items| items.iter().position(|item| item == value))
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.index_of(value).is_some()
    }

    pub fn append(&self, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.modify(|items| {
            items.push(value);
            Ok(((), vec![FieldKey::index(items.len() - 1)]))
        })
    }

    /// Insert before `index`. `index == len` appends.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.modify(|items| {
            if index > items.len() {
                return Err(out_of_range(index, items.len()));
            }
            items.insert(index, value);
            Ok(((), span(index..items.len())))
        })
    }

    /// Overwrite the item at `index`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.modify(|items| {
            let len = items.len();
            let slot = items.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
            *slot = value;
            Ok(((), vec![FieldKey::index(index)]))
        })
    }

    pub fn delete(&self, index: usize) -> CoreResult<()> {
        self.pop(index).map(drop)
    }

    /// Remove and return the item at `index`.
    pub fn pop(&self, index: usize) -> CoreResult<Value> {
        self.modify(|items| {
            let old_len = items.len();
            if index >= old_len {
                return Err(out_of_range(index, old_len));
            }
            let value = items.remove(index);
            Ok((value, span(index..old_len)))
        })
    }

    /// Remove and return the last item.
    pub fn pop_last(&self) -> CoreResult<Value> {
        self.modify(|items| {
            let value = items.pop().ok_or_else(|| out_of_range(0, 0))?;
            Ok((value, vec![FieldKey::index(items.len())]))
        })
    }

    pub fn extend<I, V>(&self, values: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.modify(|items| {
            let old_len = items.len();
            items.extend(values);
            Ok(((), span(old_len..items.len())))
        })
    }

    /// Remove every item. All previously present indices become dirty.
    pub fn clear(&self) -> CoreResult<()> {
        self.modify(|items| {
            let old_len = items.len();
            items.clear();
            Ok(((), span(0..old_len)))
        })
    }

    /// Sort with [`Value::total_cmp`].
    pub fn sort(&self) -> CoreResult<()> {
        self.sort_by(Value::total_cmp)
    }

    /// Stable sort with a caller-supplied order.
    ///
    /// The sequence is locked while `compare` runs; it must not touch this
    /// sequence.
    pub fn sort_by<F>(&self, compare: F) -> CoreResult<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.modify(|items| {
            items.sort_by(compare);
            Ok(((), span(0..items.len())))
        })
    }

    pub fn reverse(&self) -> CoreResult<()> {
        self.modify(|items| {
            items.reverse();
            Ok(((), span(0..items.len())))
        })
    }

    /// Remove the first item equal to `value`. Returns whether one was found.
    pub fn remove(&self, value: &Value) -> CoreResult<bool> {
        self.modify(|items| {
            let old_len = items.len();
            match items.iter().position(|item| item == value) {
                Some(index) => {
                    items.remove(index);
                    Ok((true, span(index..old_len)))
                }
                None => Ok((false, Vec::new())),
            }
        })
    }

    /// Repeat the current contents `times` times in place.
    ///
    /// `repeat(0)` empties the sequence and dirties every old index.
    pub fn repeat(&self, times: usize) -> CoreResult<()> {
        self.modify(|items| {
            let old_len = items.len();
            if times == 0 {
                items.clear();
                return Ok(((), span(0..old_len)));
            }
            let repeated: Vec<Value> = (0..times).flat_map(|_| items.iter().cloned()).collect();
            *items = repeated;
            Ok(((), span(old_len..items.len())))
        })
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::context::testing::{sequence_ctx, RecordingHook};

    fn seq_of(values: &[i64]) -> (Sequence, Arc<RecordingHook>) {
        let hook = Arc::new(RecordingHook::default());
        let seq = Sequence::from_context(sequence_ctx(1, &hook));
        seq.extend(values.iter().copied()).unwrap();
        seq.context().synchronize();
        (seq, hook)
    }

    fn dirty(seq: &Sequence) -> Vec<i64> {
        seq.context()
            .dirty_fields()
            .iter()
            .filter_map(FieldKey::as_int)
            .collect()
    }

    fn ints(seq: &Sequence) -> Vec<i64> {
        seq.to_vec().iter().filter_map(Value::as_int).collect()
    }

    // ---- dirty spans ----

    #[test]
    fn append_dirties_new_index() {
        let (seq, hook) = seq_of(&[1, 2]);
        seq.append(3).unwrap();
        assert_eq!(dirty(&seq), vec![2]);
        assert_eq!(hook.count(), 2);
    }

    #[test]
    fn insert_dirties_to_new_end() {
        let (seq, _) = seq_of(&[1, 2, 3]);
        seq.insert(1, 9).unwrap();
        assert_eq!(ints(&seq), vec![1, 9, 2, 3]);
        assert_eq!(dirty(&seq), vec![1, 2, 3]);
    }

    #[test]
    fn insert_at_len_appends() {
        let (seq, _) = seq_of(&[1]);
        seq.insert(1, 2).unwrap();
        assert_eq!(ints(&seq), vec![1, 2]);
        assert_eq!(dirty(&seq), vec![1]);
    }

    #[test]
    fn set_dirties_one_index() {
        let (seq, _) = seq_of(&[1, 2, 3]);
        seq.set(1, 5).unwrap();
        assert_eq!(dirty(&seq), vec![1]);
    }

    #[test]
    fn delete_dirties_to_old_end() {
        let (seq, _) = seq_of(&[1, 2, 3, 4]);
        seq.delete(1).unwrap();
        assert_eq!(ints(&seq), vec![1, 3, 4]);
        assert_eq!(dirty(&seq), vec![1, 2, 3]);
    }

    #[test]
    fn pop_last_dirties_old_last_index() {
        let (seq, _) = seq_of(&[1, 2]);
        assert_eq!(seq.pop_last().unwrap(), Value::Int(2));
        assert_eq!(dirty(&seq), vec![1]);
    }

    #[test]
    fn extend_dirties_only_new() {
        let (seq, _) = seq_of(&[1]);
        seq.extend([2, 3]).unwrap();
        assert_eq!(dirty(&seq), vec![1, 2]);
    }

    #[test]
    fn clear_dirties_old_range() {
        let (seq, _) = seq_of(&[1, 2, 3]);
        seq.clear().unwrap();
        assert!(seq.is_empty());
        assert_eq!(dirty(&seq), vec![0, 1, 2]);
    }

    #[test]
    fn sort_and_reverse_dirty_everything() {
        let (seq, _) = seq_of(&[3, 1, 2]);
        seq.sort().unwrap();
        assert_eq!(ints(&seq), vec![1, 2, 3]);
        assert_eq!(dirty(&seq), vec![0, 1, 2]);

        seq.context().synchronize();
        seq.reverse().unwrap();
        assert_eq!(ints(&seq), vec![3, 2, 1]);
        assert_eq!(dirty(&seq), vec![0, 1, 2]);
    }

    #[test]
    fn remove_by_value() {
        let (seq, hook) = seq_of(&[1, 2, 3]);
        assert!(seq.remove(&Value::Int(2)).unwrap());
        assert_eq!(dirty(&seq), vec![1, 2]);

        let saves = hook.count();
        assert!(!seq.remove(&Value::Int(42)).unwrap());
        assert_eq!(hook.count(), saves);
    }

    #[test]
    fn repeat_dirties_new_indices() {
        let (seq, _) = seq_of(&[1, 2]);
        seq.repeat(2).unwrap();
        assert_eq!(ints(&seq), vec![1, 2, 1, 2]);
        assert_eq!(dirty(&seq), vec![2, 3]);
    }

    #[test]
    fn repeat_zero_clears() {
        let (seq, _) = seq_of(&[1, 2]);
        seq.repeat(0).unwrap();
        assert!(seq.is_empty());
        assert_eq!(dirty(&seq), vec![0, 1]);
    }

    #[test]
    fn repeat_clones_owned_items() {
        let hook = Arc::new(RecordingHook::default());
        let seq = Sequence::from_context(sequence_ctx(1, &hook));
        seq.extend([Value::from("north"), Value::Bytes(vec![7_u8])]).unwrap();
        seq.context().synchronize();

        seq.repeat(3).unwrap();
        assert_eq!(seq.len(), 6);
        assert_eq!(seq.get(4).unwrap(), Value::from("north"));
        assert_eq!(seq.get(5).unwrap(), Value::Bytes(vec![7_u8]));
        assert_eq!(dirty(&seq), vec![2, 3, 4, 5]);

        seq.context().synchronize();
        seq.repeat(0).unwrap();
        assert!(seq.is_empty());
        assert_eq!(dirty(&seq), vec![0, 1, 2, 3, 4, 5]);
    }

    // ---- errors ----

    #[test]
    fn out_of_range_errors() {
        let (seq, _) = seq_of(&[1]);
        assert!(matches!(
            seq.get(1),
            Err(CoreError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(matches!(seq.set(5, 0), Err(CoreError::IndexOutOfRange { .. })));
        assert!(matches!(seq.insert(3, 0), Err(CoreError::IndexOutOfRange { .. })));
        assert!(matches!(seq.pop(1), Err(CoreError::IndexOutOfRange { .. })));
        seq.clear().unwrap();
        assert!(matches!(seq.pop_last(), Err(CoreError::IndexOutOfRange { .. })));
    }

    #[test]
    fn failed_op_leaves_state_clean() {
        let (seq, hook) = seq_of(&[1]);
        let saves = hook.count();
        let _ = seq.delete(4);
        assert!(!seq.context().is_dirty());
        assert_eq!(hook.count(), saves);
    }

    // ---- reads ----

    #[test]
    fn lookup_helpers() {
        let (seq, _) = seq_of(&[4, 5, 6]);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.index_of(&Value::Int(5)), Some(1));
        assert!(seq.contains(&Value::Int(6)));
        assert!(!seq.contains(&Value::from("6")));
        assert_eq!(seq.get(2).unwrap(), Value::Int(6));
    }

    // ---- properties ----

    #[derive(Clone, Debug)]
    enum Op {
        Append(i64),
        Insert(usize, i64),
        Set(usize, i64),
        Pop(usize),
        Clear,
        Sort,
        Reverse,
        Repeat(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<i64>().prop_map(Op::Append),
            (0usize..8, any::<i64>()).prop_map(|(i, v)| Op::Insert(i, v)),
            (0usize..8, any::<i64>()).prop_map(|(i, v)| Op::Set(i, v)),
            (0usize..8).prop_map(Op::Pop),
            Just(Op::Clear),
            Just(Op::Sort),
            Just(Op::Reverse),
            (0usize..3).prop_map(Op::Repeat),
        ]
    }

    proptest! {
        #[test]
        fn every_changed_cell_is_dirty(
            initial in proptest::collection::vec(-5i64..5, 0..6),
            ops in proptest::collection::vec(op(), 1..6),
        ) {
            let (seq, _) = seq_of(&initial);
            for op in ops {
                let before = ints(&seq);
                let _ = match op {
                    Op::Append(v) => seq.append(v),
                    Op::Insert(i, v) => seq.insert(i, v),
                    Op::Set(i, v) => seq.set(i, v),
                    Op::Pop(i) => seq.pop(i).map(drop),
                    Op::Clear => seq.clear(),
                    Op::Sort => seq.sort(),
                    Op::Reverse => seq.reverse(),
                    Op::Repeat(n) => seq.repeat(n),
                };
                let after = ints(&seq);
                let marked = dirty(&seq);
                let bound = before.len().max(after.len()) as i64;
                for i in 0..bound as usize {
                    if before.get(i) != after.get(i) {
                        prop_assert!(marked.contains(&(i as i64)), "index {} changed but is clean", i);
                    }
                }
                prop_assert!(marked.iter().all(|&i| i >= 0 && i < bound));
                seq.context().synchronize();
            }
        }
    }
}
