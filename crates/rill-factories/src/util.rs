//! Stream helpers used by the composed patterns.

use futures::{Stream, StreamExt};

/// Sample the latest value of `latest` at each `events` emission.
///
/// Events arriving before `latest` produced anything are dropped.
pub(crate) fn with_latest_from<A, B>(
    events: impl Stream<Item = A> + Send + 'static,
    latest: impl Stream<Item = B> + Send + 'static,
) -> impl Stream<Item = (A, B)> + Send
where
    A: Send + 'static,
    B: Clone + Send + 'static,
{
    enum Tag<A, B> {
        Event(A),
        Latest(B),
    }
    futures::stream::select(events.map(Tag::Event).boxed(), latest.map(Tag::Latest).boxed())
        .scan(None::<B>, |state, tag| {
            let out = match tag {
                Tag::Latest(b) => {
                    *state = Some(b);
                    None
                }
                Tag::Event(a) => state.clone().map(|b| (a, b)),
            };
            futures::future::ready(Some(out))
        })
        .filter_map(futures::future::ready)
}
