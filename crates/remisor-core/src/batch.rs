/// Groups a fallible item iterator into vectors of at most `size` items.
///
/// An error ends the current batch early: the items gathered so far are
/// dropped and the error is yielded on its own, so callers never see a
/// partially filled batch followed by a failure for the same records.
pub struct Batched<I> {
    inner: I,
    size: usize,
    done: bool,
}

impl<I> Batched<I> {
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            done: false,
        }
    }
}

impl<I, T, E> Iterator for Batched<I>
where
    I: Iterator<Item = Result<T, E>>,
{
    type Item = Result<Vec<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.inner.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

pub trait BatchExt: Iterator + Sized {
    fn batched(self, size: usize) -> Batched<Self> {
        Batched::new(self, size)
    }
}

impl<I: Iterator> BatchExt for I {}
