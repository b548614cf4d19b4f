//! Escalation tiers: which prompt template pool each outreach step uses.

use std::ops::RangeInclusive;

use groupwake_core::types::TierBucket;
use rand::Rng;

/// Outreach prompt templates, grouped by tier.
pub const PROMPT_TEMPLATES: [&str; 10] = [
    // Opening: noticed the group went quiet
    "Write a short message saying you noticed the group has been quiet for a while and you'd like to liven things up; ask what everyone is up to or bring up something fun to talk about. Stay in character.",
    "Write a short message saying the chat feels a bit empty and you'd like to chat with everyone; greet people or raise a light topic. Stay in character.",
    "Write a short message saying the group has been silent for a long time and you want to start some conversation; share something from your day or ask how people are doing. Stay in character.",
    "Write a short message saying there hasn't been much going on in the group and you'd like to get the conversation going with an interesting question or a simple hello. Stay in character.",
    // Mid: still trying
    "Write a short message acknowledging your earlier attempt to liven up the group went unanswered, maybe everyone is busy, and keep trying to engage in a friendly way. Stay in character.",
    "Write a short message saying you understand everyone might be busy but you'd still love to chat with the group, keeping a warm and friendly tone. Stay in character.",
    // Late: understanding but still caring
    "Write a short message saying you understand everyone has their own things going on, but you still care about the people here and hope all is well. Stay in character.",
    "Write a short message saying that even though the group is quiet you're still around, and everyone is welcome to chat whenever they like. Stay in character.",
    // Final: backing off gently
    "Write a short message saying you'll keep an eye on the group quietly and won't keep interrupting, but everyone is welcome to chat when they have time. Stay in character.",
    "Write a short message saying you understand the group has its own rhythm and you'll speak up less often, but you're always here. Stay in character.",
];

/// Fixed lookup of template index ranges per bucket.
const BUCKET_RANGES: [(TierBucket, RangeInclusive<usize>); 4] = [
    (TierBucket::Opening, 0..=3),
    (TierBucket::Mid, 4..=5),
    (TierBucket::Late, 6..=7),
    (TierBucket::Final, 8..=9),
];

/// Pick the bucket for the count a send would commit.
///
/// The first two steps always use the opening and mid pools; the final pool
/// wins over the late pool when `next_count` reaches the maximum.
pub fn bucket_for(next_count: u32, max_consecutive: u32) -> TierBucket {
    if next_count == 1 {
        TierBucket::Opening
    } else if next_count == 2 {
        TierBucket::Mid
    } else if next_count == max_consecutive {
        TierBucket::Final
    } else {
        TierBucket::Late
    }
}

/// Template index range for a bucket.
pub fn template_range(bucket: TierBucket) -> RangeInclusive<usize> {
    BUCKET_RANGES
        .iter()
        .find(|(b, _)| *b == bucket)
        .map(|(_, range)| range.clone())
        .unwrap_or(0..=0)
}

/// Choose a template uniformly within the bucket's range.
pub fn select_template<R: Rng + ?Sized>(bucket: TierBucket, rng: &mut R) -> (usize, &'static str) {
    let range = template_range(bucket);
    let index = rng.gen_range(range).min(PROMPT_TEMPLATES.len() - 1);
    (index, PROMPT_TEMPLATES[index])
}
