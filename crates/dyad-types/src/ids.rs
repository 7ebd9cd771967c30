// Participant identity (the rank of a producer or consumer process).
strong_type!(ParticipantId, u32);

impl ParticipantId {
    /// Tag pairing a producer with a consumer for one RMA exchange.
    ///
    /// Distinct (producer, consumer) pairs never share a tag.
    pub fn transfer_tag(producer: ParticipantId, consumer: ParticipantId) -> u64 {
        ((producer.0 as u64) << 32) | consumer.0 as u64
    }
}
