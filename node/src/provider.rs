// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The uniqueness provider contract.
//!
//! Every backend answers the same question: may this transaction consume
//! these states? A provider records one audit entry per call and decides
//! with `notary_kernel::decide`, so backends differ only in how they make
//! the decision atomic and durable.

use crate::errors::ProviderError;
use futures::future::BoxFuture;
use notary_kernel::{CommitRequest, UniquenessResult};

pub type CommitFuture<'a> = BoxFuture<'a, Result<UniquenessResult, ProviderError>>;
pub type ReceiptFuture<'a> = BoxFuture<'a, Result<CommitReceipt, ProviderError>>;

/// A commit result plus what the provider learned about the transaction's
/// own outputs while deciding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub result: UniquenessResult,
    /// This call first notarised the transaction and none of its outputs
    /// had been consumed at that point.
    pub fresh_outputs: bool,
}

pub trait UniquenessProvider: Send + Sync {
    /// Commit `request.states` to `request.tx_id`, or report why not.
    fn commit(&self, request: CommitRequest) -> CommitFuture<'_>;

    /// `commit` with a receipt. Providers that cannot see their own commit
    /// log never report fresh outputs.
    fn commit_with_receipt(&self, request: CommitRequest) -> ReceiptFuture<'_> {
        let pending = self.commit(request);
        Box::pin(async move { Ok(CommitReceipt { result: pending.await?, fresh_outputs: false }) })
    }

    /// Backend label for logs and metrics.
    fn name(&self) -> &'static str;
}

impl<P: UniquenessProvider + ?Sized> UniquenessProvider for std::sync::Arc<P> {
    fn commit(&self, request: CommitRequest) -> CommitFuture<'_> {
        (**self).commit(request)
    }

    fn commit_with_receipt(&self, request: CommitRequest) -> ReceiptFuture<'_> {
        (**self).commit_with_receipt(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
