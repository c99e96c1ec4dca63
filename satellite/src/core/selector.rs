use crate::{
    config::{
        HOST_REQUEST_MULTIPLIER, RANDOM_HOSTS_BUFFER_FOR_SCORE, SCORE_LEEWAY_GOOD_FOR_RENEW,
        SCORE_LEEWAY_GOOD_FOR_UPLOAD,
    },
    core::{error::ContractorError, providers::HostDirectory},
};
use log::trace;
use orbit_common::{account::Allowance, crypto::PublicKey, currency::Currency, host::HostEntry};

// Score floors below which a contract loses its utility flags
#[derive(Clone, Copy, Debug)]
pub struct MinScores {
    pub good_for_renew: Currency,
    pub good_for_upload: Currency,
}

// Candidate hosts for forming new contracts. More hosts than needed are
// requested so that failed negotiations have fallbacks to move on to.
pub async fn candidate_hosts(
    hdb: &dyn HostDirectory,
    allowance: &Allowance,
    needed: u64,
    blacklist: &[PublicKey],
    address_blacklist: &[PublicKey],
) -> Result<Vec<HostEntry>, ContractorError> {
    let want = needed
        .saturating_mul(HOST_REQUEST_MULTIPLIER)
        .saturating_add(RANDOM_HOSTS_BUFFER_FOR_SCORE) as usize;
    trace!("requesting {} candidate hosts", want);
    hdb.random_hosts_with_limits(want, blacklist, address_blacklist, allowance)
        .await
}

// Sample the directory and derive the minimum acceptable scores from the
// lowest score in the sample. None when the directory has no usable
// hosts to compare against.
pub async fn min_scores(
    hdb: &dyn HostDirectory,
    allowance: &Allowance,
) -> Result<Option<MinScores>, ContractorError> {
    let sample_size = allowance
        .hosts
        .saturating_add(RANDOM_HOSTS_BUFFER_FOR_SCORE) as usize;
    let sample = hdb
        .random_hosts_with_limits(sample_size, &[], &[], allowance)
        .await?;

    let mut lowest: Option<Currency> = None;
    for entry in &sample {
        let score = hdb.score_breakdown(entry).await?;
        lowest = Some(match lowest {
            Some(current) if current <= score => current,
            _ => score,
        });
    }

    Ok(lowest.map(|score| MinScores {
        good_for_renew: score.div_u64(SCORE_LEEWAY_GOOD_FOR_RENEW),
        good_for_upload: score.div_u64(SCORE_LEEWAY_GOOD_FOR_UPLOAD),
    }))
}
