/// One unit on a worker's input queue.
///
/// `End` is the cooperative end-of-stream marker: a queue-driven worker that reads it
/// leaves its main loop normally. It is distinct from the shutdown token, which aborts
/// the loop immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Work<T> {
    Item(T),
    End,
}

impl<T> Work<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Work::End)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Work::Item(item) => Some(item),
            Work::End => None,
        }
    }
}

impl<T> From<T> for Work<T> {
    fn from(item: T) -> Self {
        Work::Item(item)
    }
}
