//! Protobuf wire messages for the compact binary encoding.
//!
//! These mirror the domain types field for field. Every message-typed field is
//! optional on the wire, so converting back into a [`Subgraph`] checks that
//! each triple is fully populated.

use super::{DecodeError, Object, Predicate, Subgraph, Subject, Triple};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubgraphMessage {
    #[prost(message, repeated, tag = "1")]
    pub triples: Vec<TripleMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TripleMessage {
    #[prost(message, optional, tag = "1")]
    pub subject: Option<SubjectMessage>,
    #[prost(message, optional, tag = "2")]
    pub predicate: Option<PredicateMessage>,
    #[prost(message, optional, tag = "3")]
    pub object: Option<ObjectMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubjectMessage {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(string, tag = "2")]
    pub tuid: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PredicateMessage {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectMessage {
    #[prost(oneof = "ObjectValue", tags = "1,2")]
    pub value: Option<ObjectValue>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum ObjectValue {
    #[prost(string, tag = "1")]
    String(String),
    #[prost(message, tag = "2")]
    Subject(SubjectMessage),
}

impl From<&Subject> for SubjectMessage {
    fn from(subject: &Subject) -> Self {
        Self { kind: subject.kind.clone(), tuid: subject.tuid.clone() }
    }
}

impl From<SubjectMessage> for Subject {
    fn from(msg: SubjectMessage) -> Self {
        Self { kind: msg.kind, tuid: msg.tuid }
    }
}

impl From<&Subgraph> for SubgraphMessage {
    fn from(subgraph: &Subgraph) -> Self {
        let triples = subgraph
            .triples
            .iter()
            .map(|t| TripleMessage {
                subject: Some(SubjectMessage::from(&t.subject)),
                predicate: Some(PredicateMessage { name: t.predicate.name.clone() }),
                object: Some(ObjectMessage {
                    value: Some(match &t.object {
                        Object::String(s) => ObjectValue::String(s.clone()),
                        Object::Subject(s) => ObjectValue::Subject(SubjectMessage::from(s)),
                    }),
                }),
            })
            .collect();
        Self { triples }
    }
}

impl TryFrom<TripleMessage> for Triple {
    type Error = DecodeError;

    fn try_from(msg: TripleMessage) -> Result<Self, Self::Error> {
        let subject = msg.subject.ok_or(DecodeError::MissingField("triple.subject"))?;
        let predicate = msg.predicate.ok_or(DecodeError::MissingField("triple.predicate"))?;
        let value = msg
            .object
            .and_then(|o| o.value)
            .ok_or(DecodeError::MissingField("triple.object"))?;

        let object = match value {
            ObjectValue::String(s) => Object::String(s),
            ObjectValue::Subject(s) => Object::Subject(s.into()),
        };

        Ok(Triple { subject: subject.into(), predicate: Predicate { name: predicate.name }, object })
    }
}

impl TryFrom<SubgraphMessage> for Subgraph {
    type Error = DecodeError;

    fn try_from(msg: SubgraphMessage) -> Result<Self, Self::Error> {
        let triples = msg.triples.into_iter().map(Triple::try_from).collect::<Result<_, _>>()?;
        Ok(Subgraph { triples })
    }
}
