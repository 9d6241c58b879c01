//! Topics and content-filtered topics.

use crate::filter::{CompiledFilter, FilterExpression};
use crate::qos::TopicQos;
use crate::types::TopicType;
use std::marker::PhantomData;
use std::sync::Arc;

/// Anything a data reader can be bound to.
pub trait TopicDescription<T: TopicType> {
    /// Name of the description itself.
    fn name(&self) -> &str;

    /// Name of the topic samples are matched on.
    fn topic_name(&self) -> &str;

    /// Filter applied before samples reach the reader, if any.
    fn filter(&self) -> Option<Arc<CompiledFilter>>;
}

/// A named, typed topic.
#[derive(Debug)]
pub struct Topic<T> {
    name: String,
    qos: TopicQos,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TopicType> Topic<T> {
    pub(crate) fn new(name: String, qos: TopicQos) -> Self {
        Self {
            name,
            qos,
            _marker: PhantomData,
        }
    }

    pub fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    pub fn qos(&self) -> &TopicQos {
        &self.qos
    }
}

impl<T: TopicType> TopicDescription<T> for Topic<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic_name(&self) -> &str {
        &self.name
    }

    fn filter(&self) -> Option<Arc<CompiledFilter>> {
        None
    }
}

/// A view of a topic restricted to samples matching a filter.
#[derive(Debug)]
pub struct ContentFilteredTopic<T> {
    name: String,
    related_topic: String,
    filter: Arc<CompiledFilter>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TopicType> ContentFilteredTopic<T> {
    pub(crate) fn new(name: String, related_topic: &Topic<T>, filter: CompiledFilter) -> Self {
        Self {
            name,
            related_topic: related_topic.name.clone(),
            filter: Arc::new(filter),
            _marker: PhantomData,
        }
    }

    pub fn filter_expression(&self) -> &FilterExpression {
        self.filter.expression()
    }
}

impl<T: TopicType> TopicDescription<T> for ContentFilteredTopic<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic_name(&self) -> &str {
        &self.related_topic
    }

    fn filter(&self) -> Option<Arc<CompiledFilter>> {
        Some(Arc::clone(&self.filter))
    }
}
