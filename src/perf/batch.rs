use tokio::task;

/// Runs `transform` over `items` in chunks of `batch_size` and concatenates
/// the results. A zero batch size is treated as one.
pub fn process_in_batches<T, R, F>(items: &[T], batch_size: usize, mut transform: F) -> Vec<R>
where
    F: FnMut(&[T]) -> Vec<R>,
{
    let mut output = Vec::with_capacity(items.len());
    for chunk in items.chunks(batch_size.max(1)) {
        output.extend(transform(chunk));
    }
    output
}

/// Like [`process_in_batches`], yielding to the scheduler between chunks so a
/// large backlog does not starve other tasks on the runtime.
pub async fn process_in_batches_yielding<T, R, F>(
    items: &[T],
    batch_size: usize,
    mut transform: F,
) -> Vec<R>
where
    F: FnMut(&[T]) -> Vec<R>,
{
    let mut output = Vec::with_capacity(items.len());
    for (index, chunk) in items.chunks(batch_size.max(1)).enumerate() {
        if index > 0 {
            task::yield_now().await;
        }
        output.extend(transform(chunk));
    }
    output
}
