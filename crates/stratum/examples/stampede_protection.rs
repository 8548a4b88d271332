// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A hundred concurrent requests for the same missing key run the expensive computation
//! once.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures::future::join_all;
use stratum::{EntryOptions, HybridCache};

#[derive(Debug, thiserror::Error)]
#[error("report generation failed")]
struct ReportFailed;

#[tokio::main]
async fn main() -> stratum::Result<()> {
    let cache = HybridCache::builder().name("reports").build();
    let runs = AtomicUsize::new(0);
    let runs = &runs;

    let requests = (0..100).map(|_| {
        cache.get_or_create("report:daily", EntryOptions::new().with_tag("reports"), move |_| async move {
            runs.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ReportFailed>("42 orders, 3 refunds".to_string())
        })
    });

    let reports = join_all(requests).await.into_iter().collect::<stratum::Result<Vec<_>>>()?;

    println!(
        "{} callers received {:?}; the report was generated {} time(s)",
        reports.len(),
        reports[0],
        runs.load(Ordering::Relaxed)
    );
    Ok(())
}
