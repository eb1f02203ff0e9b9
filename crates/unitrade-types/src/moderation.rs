use crate::models::FlaggedListing;

/// Case-insensitive substring match over the columns the moderation table
/// shows: title, category, reason, seller email and status.
pub fn matches_query(listing: &FlaggedListing, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    [
        listing.title.as_str(),
        listing.category.as_str(),
        listing.reason.as_str(),
        listing.seller_email.as_str(),
        listing.status.as_str(),
    ]
    .iter()
    .any(|field| field.to_lowercase().contains(&q))
}

pub fn filter_flagged<'a>(listings: &'a [FlaggedListing], query: &str) -> Vec<&'a FlaggedListing> {
    listings.iter().filter(|l| matches_query(l, query)).collect()
}
