//! Group tags for track transfers
//!
//! Every track transfer queued for one show download carries the same
//! opaque tag string, derived from `(show_id, recording_id)`. The
//! aggregator decodes it to cluster entries without a join table.

use showdl_types::GroupTag;

const PREFIX: &str = "showdl:";
const SEPARATOR: char = '|';

/// Build the group tag for a show/recording pair
pub fn tag_for(show_id: &str, recording_id: &str) -> GroupTag {
    GroupTag::new(show_id, recording_id)
}

/// Encode a group tag into the string attached to engine entries
///
/// Both components are percent-encoded, so the separator can never appear
/// inside them and the result is stable for a given pair.
pub fn encode(tag: &GroupTag) -> String {
    format!(
        "{}{}{}{}",
        PREFIX,
        urlencoding::encode(&tag.show_id),
        SEPARATOR,
        urlencoding::encode(&tag.recording_id)
    )
}

/// Decode an engine tag string; `None` for tags not produced by [`encode`]
pub fn decode(raw: &str) -> Option<GroupTag> {
    let rest = raw.strip_prefix(PREFIX)?;
    let (show, recording) = rest.split_once(SEPARATOR)?;

    let show_id = urlencoding::decode(show).ok()?.into_owned();
    let recording_id = urlencoding::decode(recording).ok()?.into_owned();
    if show_id.is_empty() || recording_id.is_empty() {
        return None;
    }

    Some(GroupTag {
        show_id,
        recording_id,
    })
}
