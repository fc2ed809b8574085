//! Static table of the fine-grained actions that make up each capability, per service.

use std::collections::BTreeSet;

use crate::Capability;

pub struct ServiceActions {
    pub read: &'static [&'static str],
    pub write: &'static [&'static str],
}

impl ServiceActions {
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Every action evaluated for the service: read then write.
    pub fn all(&self) -> Vec<String> {
        self.read
            .iter()
            .chain(self.write.iter())
            .map(|a| a.to_string())
            .collect()
    }
}

const DAX: ServiceActions = ServiceActions {
    read: &[
        "dax:BatchGetItem",
        "dax:ConditionCheckItem",
        "dax:GetItem",
        "dax:Query",
        "dax:Scan",
    ],
    write: &[
        "dax:BatchWriteItem",
        "dax:DeleteItem",
        "dax:PutItem",
        "dax:UpdateItem",
    ],
};

const DYNAMODB: ServiceActions = ServiceActions {
    read: &[
        "dynamodb:BatchGetItem",
        "dynamodb:GetItem",
        "dynamodb:GetRecords",
        "dynamodb:Query",
        "dynamodb:Scan",
    ],
    write: &[
        "dynamodb:BatchWriteItem",
        "dynamodb:DeleteItem",
        "dynamodb:PutItem",
        "dynamodb:UpdateItem",
        "dynamodb:UpdateTimeToLive",
    ],
};

const ELASTICACHE: ServiceActions = ServiceActions {
    read: &[],
    write: &[],
};

const KINESIS: ServiceActions = ServiceActions {
    read: &["kinesis:GetRecords", "kinesis:SubscribeToShard"],
    write: &["kinesis:PutRecord", "kinesis:PutRecords"],
};

const S3: ServiceActions = ServiceActions {
    read: &[
        "s3:GetObject",
        "s3:GetObjectTorrent",
        "s3:GetObjectVersion",
        "s3:GetObjectVersionTorrent",
        "s3:ListBucket",
        "s3:ListBucketVersions",
    ],
    write: &[
        "s3:DeleteObject",
        "s3:DeleteObjectVersion",
        "s3:PutObject",
        "s3:RestoreObject",
    ],
};

const SQS: ServiceActions = ServiceActions {
    read: &["sqs:ReceiveMessage"],
    write: &[
        "sqs:PurgeQueue",
        "sqs:SendMessage",
        "sqs:SetQueueAttributes",
    ],
};

/// Actions for `service`; `None` for a service with no table entry.
pub fn service_actions(service: &str) -> Option<&'static ServiceActions> {
    match service {
        "dax" => Some(&DAX),
        "dynamodb" => Some(&DYNAMODB),
        "elasticache" => Some(&ELASTICACHE),
        "kinesis" => Some(&KINESIS),
        "s3" => Some(&S3),
        "sqs" => Some(&SQS),
        _ => None,
    }
}

/// Whether resources of `service` are sent for evaluation at all.
pub fn is_evaluated(service: &str) -> bool {
    service_actions(service).is_some_and(|a| !a.is_empty())
}

/// Map allowed action names to capabilities. Unknown actions are ignored.
pub fn capabilities<S: AsRef<str>>(service: &str, allowed: &[S]) -> BTreeSet<Capability> {
    let mut caps = BTreeSet::new();
    let Some(actions) = service_actions(service) else {
        return caps;
    };
    for action in allowed {
        let action = action.as_ref();
        if actions.read.contains(&action) {
            caps.insert(Capability::Read);
        }
        if actions.write.contains(&action) {
            caps.insert(Capability::Write);
        }
    }
    caps
}
