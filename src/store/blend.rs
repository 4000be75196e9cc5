// src/store/blend.rs
//! Read path shared with the marketplace's native listings.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ListingFilters, ListingStore, Pagination};
use crate::error::StoreError;
use crate::listing::ExternalListing;

/// An external listing as the marketplace sees it: the record plus `isExternal: true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalJob {
    #[serde(flatten)]
    pub listing: ExternalListing,
    pub is_external: bool,
}

impl From<ExternalListing> for ExternalJob {
    fn from(listing: ExternalListing) -> Self {
        Self {
            listing,
            is_external: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalJobsPage {
    pub data: Vec<ExternalJob>,
    pub pagination: Pagination,
}

pub async fn get_external_jobs(
    store: &dyn ListingStore,
    filters: &ListingFilters,
    page: u32,
    limit: u32,
) -> Result<ExternalJobsPage, StoreError> {
    let res = store.query(filters, page, limit).await?;
    Ok(ExternalJobsPage {
        data: res.data.into_iter().map(ExternalJob::from).collect(),
        pagination: res.pagination,
    })
}

/// A page of the caller's own listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NativePage<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum BlendedItem<T> {
    Native(T),
    External(ExternalJob),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlendedPage<T> {
    pub data: Vec<BlendedItem<T>>,
    pub pagination: Pagination,
}

/// Native items first, then external ones, with one combined pagination block
/// (native page and limit, summed totals). A failed external query degrades to
/// the native page alone.
pub fn blend_with_native<T>(
    native: NativePage<T>,
    external: Result<ExternalJobsPage, StoreError>,
) -> BlendedPage<T> {
    let np = native.pagination;
    let mut data: Vec<BlendedItem<T>> = native.data.into_iter().map(BlendedItem::Native).collect();

    match external {
        Ok(ext) => {
            let total = np.total + ext.pagination.total;
            data.extend(ext.data.into_iter().map(BlendedItem::External));
            BlendedPage {
                data,
                pagination: Pagination::new(np.page, np.limit, total),
            }
        }
        Err(e) => {
            warn!(target: "store", error = %e, "external listings unavailable, serving native only");
            BlendedPage {
                data,
                pagination: np,
            }
        }
    }
}
