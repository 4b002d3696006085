use crate::common::*;

/// An extension trait that restores submission order of indexed outcomes.
pub trait IndexStreamExt
where
    Self: Stream<Item = (usize, Self::IndexedItem)>,
{
    type IndexedItem;

    /// Reorders `(index, item)` pairs by index, starting from zero.
    ///
    /// Items arriving ahead of their turn are buffered until every item with
    /// a smaller index was yielded. It is used to give completion-ordered
    /// outcomes back their submission order.
    ///
    /// ```rust
    /// # futures::executor::block_on(async {
    /// use futures::prelude::*;
    /// use lazy_react::IndexStreamExt as _;
    ///
    /// let ordered: Vec<_> = stream::iter([(2, 'c'), (0, 'a'), (1, 'b')])
    ///     .reorder_enumerated()
    ///     .collect()
    ///     .await;
    /// assert_eq!(ordered, ['a', 'b', 'c']);
    /// # })
    /// ```
    fn reorder_enumerated(self) -> ReorderEnumerated<Self, Self::IndexedItem>
    where
        Self: Sized,
    {
        ReorderEnumerated {
            next: 0,
            pending: VecDeque::new(),
            stream: self,
        }
    }
}

impl<S, T> IndexStreamExt for S
where
    S: Stream<Item = (usize, T)>,
{
    type IndexedItem = T;
}

pub use reorder_enumerated::*;

mod reorder_enumerated {
    use super::*;

    /// A stream combinator returned from [reorder_enumerated()](IndexStreamExt::reorder_enumerated).
    #[derive(Derivative)]
    #[derivative(Debug)]
    #[pin_project]
    pub struct ReorderEnumerated<S, T>
    where
        S: ?Sized,
    {
        pub(super) next: usize,
        /// Slot `i` holds the item for index `next + i` once it arrived.
        #[derivative(Debug = "ignore")]
        pub(super) pending: VecDeque<Option<T>>,
        #[pin]
        #[derivative(Debug = "ignore")]
        pub(super) stream: S,
    }

    impl<S, T> Stream for ReorderEnumerated<S, T>
    where
        S: Stream<Item = (usize, T)>,
    {
        type Item = T;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
            let mut this = self.project();

            Ready(loop {
                if let Some(Some(_)) = this.pending.front() {
                    *this.next += 1;
                    break this.pending.pop_front().flatten();
                }

                match ready!(this.stream.as_mut().poll_next(cx)) {
                    Some((index, item)) => {
                        let offset = match index.checked_sub(*this.next) {
                            Some(offset) => offset,
                            None => panic!("index {} appears more than once", index),
                        };
                        if this.pending.len() <= offset {
                            this.pending.resize_with(offset + 1, || None);
                        }
                        let slot = &mut this.pending[offset];
                        assert!(slot.is_none(), "index {} appears more than once", index);
                        *slot = Some(item);
                    }
                    None => {
                        assert!(
                            this.pending.is_empty(),
                            "the item for index {} is missing",
                            this.next
                        );
                        break None;
                    }
                }
            })
        }
    }
}
