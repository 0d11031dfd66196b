//! Batched tag access.
//!
//! A [`TagGroup`] packs the read or write requests of many tags into
//! Multiple Service Packet requests addressed to the Message Router. A batch
//! is closed once its requests (plus two bytes of offset table each) reach
//! [`BATCH_THRESHOLD`] bytes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cip::message_router::{self, services, MessageRouterReply};
use crate::cip::EPath;
use crate::error::Result;
use crate::tag::Tag;
use crate::template::TemplateRegistry;

/// Accumulated request size that closes a batch.
pub const BATCH_THRESHOLD: usize = 300;

/// One Multiple Service Packet request and the tags it covers, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRequest {
    /// Encoded Message Router request.
    pub data: Vec<u8>,
    /// Instance ids of the tags, in request order.
    pub tag_ids: Vec<String>,
}

/// Ordered set of tags keyed by instance id.
#[derive(Debug, Default, Clone)]
pub struct TagGroup {
    tags: Vec<Arc<Tag>>,
}

impl TagGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag; returns `false` if a tag with the same id is present.
    pub fn add(&mut self, tag: Arc<Tag>) -> bool {
        if self.contains(tag.instance_id()) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    /// Removes a tag by instance id.
    pub fn remove(&mut self, instance_id: &str) -> Option<Arc<Tag>> {
        let index = self
            .tags
            .iter()
            .position(|t| t.instance_id() == instance_id)?;
        Some(self.tags.remove(index))
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tag>> {
        self.tags.iter()
    }

    /// Returns whether a tag id is present.
    pub fn contains(&self, instance_id: &str) -> bool {
        self.get(instance_id).is_some()
    }

    /// Tag by instance id.
    pub fn get(&self, instance_id: &str) -> Option<&Arc<Tag>> {
        self.tags.iter().find(|t| t.instance_id() == instance_id)
    }

    /// Read requests for every tag.
    pub fn generate_read_message_requests(&self) -> Vec<GroupRequest> {
        batch(
            self.tags.iter().map(|tag| {
                let msg = tag.generate_read_message_request(None);
                (tag.instance_id().to_string(), msg)
            }),
        )
    }

    /// Applies the sub-replies of one read batch, positionally.
    ///
    /// Failed sub-replies are recorded on their tag. The first decoding error
    /// is returned after every reply has been applied.
    pub fn parse_read_message_responses(
        &self,
        responses: &[MessageRouterReply],
        ids: &[String],
        registry: &TemplateRegistry,
    ) -> Result<()> {
        let mut first_error = None;
        for (reply, id) in responses.iter().zip(ids) {
            let Some(tag) = self.get(id) else {
                continue;
            };
            let outcome = reply
                .check_status()
                .and_then(|()| tag.parse_read_message_response(&reply.data, registry));
            if let Err(err) = outcome {
                warn!(tag = %tag.name(), error = %err, "group read failed for tag");
                tag.record_error(&err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Write requests for tags whose staged value differs from the
    /// controller value.
    pub fn generate_write_message_requests(&self) -> Result<Vec<GroupRequest>> {
        let messages = self
            .tags
            .iter()
            .filter(|tag| tag.needs_write())
            .map(|tag| {
                let size = tag.read_size();
                tag.generate_write_message_request(None, size)
                    .map(|msg| (tag.instance_id().to_string(), msg))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(batch(messages))
    }

    /// Marks the tags of one write batch as written.
    ///
    /// Every listed tag is unstaged; failed sub-replies are also recorded on
    /// their tag.
    pub fn parse_write_message_requests(&self, responses: &[MessageRouterReply], ids: &[String]) {
        for (i, id) in ids.iter().enumerate() {
            let Some(tag) = self.get(id) else {
                continue;
            };
            if let Some(reply) = responses.get(i).filter(|r| !r.is_success()) {
                tag.record_error(&reply.to_error());
            }
            tag.unstage_write_request();
        }
    }
}

fn batch(messages: impl IntoIterator<Item = (String, Vec<u8>)>) -> Vec<GroupRequest> {
    let path = EPath::new().class(0x02).instance(0x01);
    let close = |msgs: &mut Vec<Vec<u8>>, ids: &mut Vec<String>, out: &mut Vec<GroupRequest>| {
        let body = message_router::build_multiple_service_packet(msgs);
        out.push(GroupRequest {
            data: message_router::build(
                services::MULTIPLE_SERVICE_PACKET,
                path.as_bytes(),
                &body,
            ),
            tag_ids: std::mem::take(ids),
        });
        msgs.clear();
    };

    let mut out = Vec::new();
    let mut msgs = Vec::new();
    let mut ids = Vec::new();
    let mut length = 0usize;

    for (id, msg) in messages {
        length += msg.len() + 2;
        ids.push(id);
        msgs.push(msg);
        if length >= BATCH_THRESHOLD {
            close(&mut msgs, &mut ids, &mut out);
            length = 0;
        }
    }
    if !msgs.is_empty() {
        close(&mut msgs, &mut ids, &mut out);
    }
    debug!(batches = out.len(), "built group requests");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip::DataType;
    use crate::value::TagValue;
    use std::collections::HashSet;

    fn group_of(names: &[String]) -> TagGroup {
        let mut group = TagGroup::new();
        for name in names {
            group.add(Arc::new(Tag::new(name.as_str()).unwrap()));
        }
        group
    }

    fn reply(data: Vec<u8>) -> MessageRouterReply {
        MessageRouterReply {
            service: services::READ_TAG | message_router::REPLY_MASK,
            general_status: 0,
            extended_status: Vec::new(),
            data,
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut group = TagGroup::new();
        let tag = Arc::new(Tag::new("tag").unwrap());
        assert!(group.add(tag.clone()));
        assert!(!group.add(Arc::new(Tag::new("tag").unwrap())));
        assert_eq!(group.len(), 1);
        assert!(group.remove(tag.instance_id()).is_some());
        assert!(group.is_empty());
    }

    #[test]
    fn test_small_group_is_one_batch() {
        let names: Vec<String> = (0..5).map(|i| format!("tag{i}")).collect();
        let group = group_of(&names);
        let batches = group.generate_read_message_requests();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tag_ids.len(), 5);

        let data = &batches[0].data;
        assert_eq!(&data[..6], &[0x0A, 0x02, 0x20, 0x02, 0x24, 0x01]);
        assert_eq!(&data[6..8], &[0x05, 0x00]);
    }

    #[test]
    fn test_large_group_splits_batches() {
        let names: Vec<String> = (0..40)
            .map(|i| format!("a_rather_long_tag_name_number_{i:02}"))
            .collect();
        let group = group_of(&names);
        let batches = group.generate_read_message_requests();
        let all: Vec<&String> = batches.iter().flat_map(|b| &b.tag_ids).collect();
        assert_eq!(all.len(), 40);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 40);
        let expected: HashSet<_> = group.iter().map(|t| t.instance_id().to_string()).collect();
        assert_eq!(
            all.into_iter().cloned().collect::<HashSet<_>>(),
            expected
        );

        // 32-character names give 38-byte requests, 40 bytes with their offset
        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|b| b.tag_ids.len() == 8));
    }

    #[test]
    fn test_read_responses_are_positional() {
        let names = vec!["a".to_string(), "b".to_string()];
        let group = group_of(&names);
        let ids: Vec<String> = group.iter().map(|t| t.instance_id().to_string()).collect();
        let responses = vec![
            reply(vec![0xC4, 0x00, 1, 0, 0, 0]),
            reply(vec![0xC3, 0x00, 2, 0]),
        ];
        group
            .parse_read_message_responses(&responses, &ids, &TemplateRegistry::new())
            .unwrap();

        let values: Vec<_> = group.iter().map(|t| t.controller_value()).collect();
        assert_eq!(values, vec![Some(TagValue::Dint(1)), Some(TagValue::Int(2))]);
    }

    #[test]
    fn test_failed_sub_reply_is_recorded() {
        let names = vec!["a".to_string(), "b".to_string()];
        let group = group_of(&names);
        let ids: Vec<String> = group.iter().map(|t| t.instance_id().to_string()).collect();
        let mut failed = reply(Vec::new());
        failed.general_status = 0x04;
        let responses = vec![failed, reply(vec![0xC4, 0x00, 9, 0, 0, 0])];

        let err = group
            .parse_read_message_responses(&responses, &ids, &TemplateRegistry::new())
            .unwrap_err();
        assert_eq!(err.cip_status(), Some(0x04));
        assert_eq!(group.get(&ids[0]).unwrap().error().unwrap().status, Some(0x04));
        assert_eq!(
            group.get(&ids[1]).unwrap().controller_value(),
            Some(TagValue::Dint(9))
        );
    }

    #[test]
    fn test_write_batches_only_changed_tags() {
        let mut group = TagGroup::new();
        let changed = Arc::new(Tag::builder("changed").datatype(DataType::DINT).build().unwrap());
        let same = Arc::new(Tag::builder("same").datatype(DataType::DINT).build().unwrap());
        let untouched = Arc::new(Tag::builder("idle").datatype(DataType::DINT).build().unwrap());
        for tag in [&changed, &same, &untouched] {
            tag.set_controller_value(TagValue::Dint(1));
            group.add(tag.clone());
        }
        changed.set_value(2i32);
        same.set_value(1i32);

        let batches = group.generate_write_message_requests().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].tag_ids, vec![changed.instance_id().to_string()]);

        group.parse_write_message_requests(&[], &batches[0].tag_ids);
        assert!(!changed.is_write_staged());
        assert_eq!(changed.controller_value(), Some(TagValue::Dint(2)));
        assert!(group.generate_write_message_requests().unwrap().is_empty());
    }
}
