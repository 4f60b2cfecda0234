use super::processors::{ChannelEventRecord, ProcessorError, ResultFields};
use super::source::SourceError;

/// One stage of the per-(channel, event) processing pipeline.
///
/// Stages run in order on a shared record; each may fill record state for the
/// stages after it and returns the named results it produced.
pub trait AdcChannelProcessor {
    fn name(&self) -> &str;

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError>;
}

/// Raw digitizer samples for a scan, addressed by event and channel.
pub trait WaveformSource {
    fn event_count(&self) -> usize;

    fn channel_count(&self) -> usize;

    fn read(&self, event: usize, channel: usize) -> Result<Vec<u16>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::{AdcChannelProcessor, WaveformSource};
    use crate::modules::processors::{
        ChannelEventRecord, FieldValue, ProcessorError, ResultFields,
    };
    use crate::modules::source::SourceError;

    struct ConstantPedestal(f64);

    impl AdcChannelProcessor for ConstantPedestal {
        fn name(&self) -> &str {
            "constant-pedestal"
        }

        fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
            record.pedestal = Some(self.0);
            let mut fields = ResultFields::new();
            fields.insert("pedestal".to_string(), FieldValue::Float(self.0));
            Ok(fields)
        }
    }

    struct EmptySource;

    impl WaveformSource for EmptySource {
        fn event_count(&self) -> usize {
            0
        }

        fn channel_count(&self) -> usize {
            0
        }

        fn read(&self, event: usize, _channel: usize) -> Result<Vec<u16>, SourceError> {
            Err(SourceError::EventOutOfRange { event, count: 0 })
        }
    }

    #[test]
    fn processors_are_usable_as_trait_objects() {
        let pipeline: Vec<Box<dyn AdcChannelProcessor>> = vec![Box::new(ConstantPedestal(512.0))];
        let mut record = ChannelEventRecord::new(0, 0, vec![512; 4]);
        for processor in &pipeline {
            let fields = processor.process(&mut record).expect("processor should succeed");
            assert_eq!(fields.get("pedestal"), Some(&FieldValue::Float(512.0)));
        }
        assert_eq!(record.pedestal, Some(512.0));
    }

    #[test]
    fn sources_report_out_of_range_reads() {
        let source: Box<dyn WaveformSource> = Box::new(EmptySource);
        assert!(matches!(
            source.read(3, 0),
            Err(SourceError::EventOutOfRange { event: 3, count: 0 })
        ));
    }
}
