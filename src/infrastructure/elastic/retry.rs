// 固定間隔のリトライ
//
// 指定したエラー種別（例: 500 TIMEOUT）のときだけ一定時間待って再実行する。
// それ以外のエラーと成功はそのまま返す。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::ErrorReason;

/// 検索ページ取得のリトライ回数
pub const SEARCH_RETRY_ATTEMPTS: u32 = 3;

/// 検索ページ取得のリトライ間隔
pub const SEARCH_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// `label`のエラーに限り、最大`max_attempts`回まで実行する
///
/// # Arguments
/// * `label` - リトライ対象のエラー種別（`TIMEOUT`など）
/// * `max_attempts` - 最大試行回数（1以上）
/// * `interval` - リトライ間隔
/// * `op` - 実行する処理
pub async fn retry_on<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    interval: Duration,
    mut op: F,
) -> Result<T, ErrorReason>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ErrorReason>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is(label) && attempt < max_attempts => {
                warn!(attempt = attempt, max_attempts = max_attempts, error = %e, "リトライ対象のエラー");
                info!(interval_ms = interval.as_millis() as u64, "リトライ待機");
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
