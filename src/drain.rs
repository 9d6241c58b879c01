//! Draining a reader: take everything buffered, classify each sample.

use crate::domain::LoanedSamples;
use crate::entities::DataReader;
use crate::error::Result;
use crate::types::{SampleInfo, TopicType};
use tracing::{debug, info};

/// One taken sample as exposed to the application.
#[derive(Debug)]
pub enum SampleView<'a, T> {
    /// Live data.
    Data { info: &'a SampleInfo, data: &'a T },
    /// An instance changed lifecycle state; no payload.
    StateChange { info: &'a SampleInfo },
}

impl<'a, T> SampleView<'a, T> {
    pub fn info(&self) -> &'a SampleInfo {
        match *self {
            SampleView::Data { info, .. } | SampleView::StateChange { info } => info,
        }
    }
}

/// Result of [`drain`]: the valid-sample count and the loan holding the batch.
pub struct Drained<T> {
    pub count: usize,
    pub loan: LoanedSamples<T>,
}

/// Take every sample currently buffered in `reader` as one batch.
///
/// Never blocks; an empty buffer yields a count of zero. Reader capacity
/// stays in use until the returned loan is dropped.
pub fn drain<T: TopicType>(reader: &DataReader<T>) -> Result<Drained<T>> {
    let loan = reader.take()?;
    let count = loan.valid_count();
    debug!(topic = reader.topic_name(), taken = loan.len(), valid = count, "Drained reader");
    Ok(Drained { count, loan })
}

/// Drain `reader` and hand each sample to `visit` in arrival order.
///
/// Returns how many samples carried data. The loan is released when this
/// returns, including when `visit` fails part way through.
pub fn drain_with<T, F>(reader: &DataReader<T>, mut visit: F) -> Result<usize>
where
    T: TopicType,
    F: FnMut(SampleView<'_, T>) -> Result<()>,
{
    let Drained { count, loan } = drain(reader)?;

    for sample in &loan {
        let info = sample.info();
        match sample.data() {
            Some(data) if info.valid_data => visit(SampleView::Data { info, data })?,
            _ => {
                info!(
                    topic = reader.topic_name(),
                    instance = %info.instance_handle,
                    state = %info.instance_state,
                    "Instance state changed"
                );
                visit(SampleView::StateChange { info })?;
            }
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::error::SubscriberError;
    use crate::pose::{Pose, POSE_TOPIC_NAME};
    use crate::qos::{DataWriterQos, QosBundle};
    use crate::types::{DomainId, InstanceState};
    use crate::EntityGraph;

    fn setup() -> (Domain, EntityGraph<Pose>) {
        let domain = Domain::new(DomainId(0));
        let graph =
            EntityGraph::<Pose>::create(&domain, &QosBundle::default(), POSE_TOPIC_NAME, None)
                .unwrap();
        (domain, graph)
    }

    #[test]
    fn test_drain_empty_reader_returns_zero() {
        let (_domain, graph) = setup();
        let drained = drain(graph.reader()).unwrap();
        assert_eq!(drained.count, 0);
        assert!(drained.loan.is_empty());
    }

    #[test]
    fn test_state_changes_are_not_counted() {
        let (domain, graph) = setup();
        let writer = domain
            .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
            .unwrap();
        let pose = Pose::at("a", 1.0, 2.0, 3.0);
        writer.write(&pose).unwrap();
        writer.dispose(&pose).unwrap();

        let mut states = Vec::new();
        let count = drain_with(graph.reader(), |view| {
            states.push(view.info().instance_state);
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(states.len(), 2);
        assert_eq!(states[1], InstanceState::NotAliveDisposed);
    }

    #[test]
    fn test_loan_blocks_second_drain_until_released() {
        let (domain, graph) = setup();
        let writer = domain
            .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
            .unwrap();
        writer.write(&Pose::at("a", 0.0, 0.0, 0.0)).unwrap();

        let first = drain(graph.reader()).unwrap();
        assert!(matches!(
            drain(graph.reader()),
            Err(SubscriberError::PreconditionNotMet(_))
        ));
        drop(first);
        assert_eq!(drain(graph.reader()).unwrap().count, 0);
    }

    #[test]
    fn test_visitor_error_releases_loan() {
        let (domain, graph) = setup();
        let writer = domain
            .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
            .unwrap();
        writer.write(&Pose::at("a", 0.0, 0.0, 0.0)).unwrap();

        let result = drain_with(graph.reader(), |_| {
            Err(SubscriberError::RuntimeFault("processing failed".to_string()))
        });
        assert!(result.is_err());
        assert!(drain(graph.reader()).is_ok());
    }
}
