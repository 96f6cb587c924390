use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// 以受限并发度执行一组future，结果按输入顺序返回
///
/// 同一时刻最多有`max_concurrent`个future在执行；单个future的结果（包括失败）
/// 只写回它自己的位置，调用方通过下标对应任务。
pub async fn do_parallel_with_limit<F, T>(futures: Vec<F>, max_concurrent: usize) -> Vec<T>
where
    F: Future<Output = T>,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let guarded = futures.into_iter().map(|fut| {
        let semaphore = semaphore.clone();
        async move {
            // 信号量不会被关闭，获取失败时直接执行
            let _permit = semaphore.acquire().await.ok();
            fut.await
        }
    });

    join_all(guarded).await
}
