use std::collections::HashSet;

use bridge_api::{ChannelRequest, ChannelResponse};

use crate::error::UnresolvableChannel;
use crate::name_map::{NameMap, is_wildcard};

/// Результат перевода запроса virtual → real.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Запрос для upstream. `None`: ни один канал не разрешился.
    pub upstream: Option<ChannelRequest>,
    pub unresolved: Vec<UnresolvableChannel>,
}

/// Перевести запрос потребителя в реальные имена.
///
/// Каждое реальное имя попадает в запрос один раз. При `wildcards`
/// имена `*` и `...` раскрываются во все каналы таблицы.
pub fn translate_request(map: &NameMap, request: &ChannelRequest, wildcards: bool) -> Translation {
    let mut seen = HashSet::new();
    let mut real = Vec::with_capacity(request.channels.len());
    let mut unresolved = Vec::new();

    for name in &request.channels {
        if wildcards && is_wildcard(name) {
            for r in map.real_names() {
                if seen.insert(r) {
                    real.push(r.to_string());
                }
            }
            continue;
        }
        match map.real_name_for(name) {
            Some(r) => {
                if seen.insert(r) {
                    real.push(r.to_string());
                }
            }
            None => unresolved.push(UnresolvableChannel { name: name.clone() }),
        }
    }

    let upstream = (!real.is_empty()).then(|| request.with_channels(real));
    Translation { upstream, unresolved }
}

/// Переписать имена payload'ов real → virtual.
///
/// Payload, чьё имя не входит в `forwarded` или не имеет виртуального
/// имени, отбрасывается: потребитель никогда не видит реальных имён.
/// Возвращает ответ и список отброшенных реальных имён.
pub fn translate_response(
    map: &NameMap,
    forwarded: &[String],
    response: ChannelResponse,
) -> (ChannelResponse, Vec<UnresolvableChannel>) {
    let forwarded: HashSet<&str> = forwarded.iter().map(String::as_str).collect();
    let mut dropped = Vec::new();
    let mut payloads = Vec::with_capacity(response.payloads.len());

    for mut payload in response.payloads {
        let virt = forwarded
            .contains(payload.name.as_str())
            .then(|| map.virtual_name_for(&payload.name))
            .flatten();
        match virt {
            Some(v) => {
                payload.name = v.to_string();
                payloads.push(payload);
            }
            None => dropped.push(UnresolvableChannel { name: payload.name }),
        }
    }

    (ChannelResponse::new(payloads), dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_api::{ChannelPayload, ReferenceMode, TypeTag};

    fn map() -> NameMap {
        NameMap::from_pairs([("rawTempC", "temp"), ("rawPress", "pressure")]).unwrap()
    }

    fn request(names: &[&str]) -> ChannelRequest {
        ChannelRequest::new(names.iter().map(|s| s.to_string()).collect(), 100.0, 10.0, ReferenceMode::Newest)
    }

    #[test]
    fn translates_virtual_to_real_keeping_window() {
        let t = translate_request(&map(), &request(&["temp"]), true);
        let up = t.upstream.unwrap();
        assert_eq!(up.channels, vec!["rawTempC"]);
        assert_eq!(up.start, 100.0);
        assert_eq!(up.duration, 10.0);
        assert_eq!(up.reference, ReferenceMode::Newest);
        assert!(t.unresolved.is_empty());
    }

    #[test]
    fn unmapped_names_are_reported_not_forwarded() {
        let t = translate_request(&map(), &request(&["bogus", "pressure", "rawTempC"]), true);
        assert_eq!(t.upstream.unwrap().channels, vec!["rawPress"]);
        let names: Vec<_> = t.unresolved.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["bogus", "rawTempC"]);
    }

    #[test]
    fn nothing_resolvable_yields_no_upstream_request() {
        let t = translate_request(&map(), &request(&["x", "y"]), true);
        assert!(t.upstream.is_none());
        assert_eq!(t.unresolved.len(), 2);

        let t = translate_request(&map(), &request(&[]), true);
        assert!(t.upstream.is_none());
        assert!(t.unresolved.is_empty());
    }

    #[test]
    fn duplicates_are_forwarded_once() {
        let t = translate_request(&map(), &request(&["temp", "temp", "pressure"]), true);
        assert_eq!(t.upstream.unwrap().channels, vec!["rawTempC", "rawPress"]);
    }

    #[test]
    fn wildcard_expands_to_every_mapped_channel() {
        let t = translate_request(&map(), &request(&["temp", "..."]), true);
        assert_eq!(t.upstream.unwrap().channels, vec!["rawTempC", "rawPress"]);

        let t = translate_request(&map(), &request(&["*"]), false);
        assert!(t.upstream.is_none());
        assert_eq!(t.unresolved[0].name, "*");
    }

    #[test]
    fn response_names_are_rewritten_to_virtual() {
        let upstream = ChannelResponse::new(vec![
            ChannelPayload::new("rawTempC", 99.0, 1.0, vec![1, 2, 3, 4])
                .with_mime("application/x-f32")
                .with_type(TypeTag::Float32),
        ]);
        let (resp, dropped) = translate_response(&map(), &["rawTempC".into()], upstream);
        assert!(dropped.is_empty());
        let p = resp.get("temp").unwrap();
        assert_eq!(p.data, vec![1, 2, 3, 4]);
        assert_eq!(p.mime, "application/x-f32");
        assert_eq!(p.type_tag, TypeTag::Float32);
        assert_eq!(p.start, 99.0);
    }

    #[test]
    fn foreign_or_unmapped_payloads_are_dropped() {
        let upstream = ChannelResponse::new(vec![
            ChannelPayload::new("rawTempC", 0.0, 1.0, vec![]),
            ChannelPayload::new("rawPress", 0.0, 1.0, vec![]),
            ChannelPayload::new("stranger", 0.0, 1.0, vec![]),
        ]);
        let (resp, dropped) = translate_response(&map(), &["rawTempC".into(), "stranger".into()], upstream);
        assert_eq!(resp.names().collect::<Vec<_>>(), vec!["temp"]);
        let dropped: Vec<_> = dropped.into_iter().map(|d| d.name).collect();
        assert_eq!(dropped, vec!["rawPress", "stranger"]);
    }
}
