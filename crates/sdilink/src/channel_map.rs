// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Which sub-unit serves which connector, per card model and duplex profile.

use crate::{
    channel::Channel,
    format::Direction,
    hardware::DuplexProfile,
    subunit::SubUnit,
};
use std::{collections::BTreeMap, sync::Arc};

const BOTH: &[Direction] = &[Direction::Input, Direction::Output];

/// One routing entry: sub-unit `sub_unit` can drive `channel` in `directions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub sub_unit: u32,
    pub channel: Channel,
    pub directions: &'static [Direction],
}

const fn route(sub_unit: u32, channel: Channel) -> Route {
    Route {
        sub_unit,
        channel,
        directions: BOTH,
    }
}

/// Routing table of one card model.
#[derive(Debug)]
pub struct ModelTable {
    pub model_name: &'static str,
    /// Number of physical SDI connectors
    pub ports: u32,
    pub profiles: &'static [(DuplexProfile, &'static [Route])],
}

use Channel::*;

static TABLES: &[ModelTable] = &[
    ModelTable {
        model_name: "DeckLink 8K Pro",
        ports: 4,
        profiles: &[
            (
                DuplexProfile::OneSubDeviceFullDuplex,
                &[
                    route(0, SingleLink1),
                    route(0, SingleLink2),
                    route(0, SingleLink3),
                    route(0, SingleLink4),
                ],
            ),
            (
                DuplexProfile::OneSubDeviceHalfDuplex,
                &[
                    route(0, SingleLink1),
                    route(0, SingleLink2),
                    route(0, SingleLink3),
                    route(0, SingleLink4),
                ],
            ),
            (
                DuplexProfile::TwoSubDevicesFullDuplex,
                &[
                    route(0, SingleLink1),
                    route(0, SingleLink2),
                    route(1, SingleLink3),
                    route(1, SingleLink4),
                ],
            ),
            (
                DuplexProfile::TwoSubDevicesHalfDuplex,
                &[
                    route(0, SingleLink1),
                    route(0, SingleLink2),
                    route(1, SingleLink3),
                    route(1, SingleLink4),
                ],
            ),
            (
                DuplexProfile::FourSubDevicesHalfDuplex,
                &[
                    route(0, SingleLink1),
                    route(1, SingleLink2),
                    route(2, SingleLink3),
                    route(3, SingleLink4),
                ],
            ),
        ],
    },
    ModelTable {
        model_name: "DeckLink Duo 2",
        ports: 4,
        profiles: &[
            (
                DuplexProfile::TwoSubDevicesFullDuplex,
                &[
                    Route {
                        sub_unit: 0,
                        channel: SingleLink1,
                        directions: &[Direction::Output],
                    },
                    Route {
                        sub_unit: 0,
                        channel: SingleLink2,
                        directions: &[Direction::Input],
                    },
                    Route {
                        sub_unit: 1,
                        channel: SingleLink3,
                        directions: &[Direction::Output],
                    },
                    Route {
                        sub_unit: 1,
                        channel: SingleLink4,
                        directions: &[Direction::Input],
                    },
                ],
            ),
            (
                DuplexProfile::FourSubDevicesHalfDuplex,
                &[
                    route(0, SingleLink1),
                    route(1, SingleLink2),
                    route(2, SingleLink3),
                    route(3, SingleLink4),
                ],
            ),
        ],
    },
    ModelTable {
        model_name: "DeckLink Quad 2",
        ports: 8,
        profiles: &[
            (
                DuplexProfile::TwoSubDevicesFullDuplex,
                &[
                    route(0, SingleLink1),
                    route(0, SingleLink2),
                    route(0, SingleLink3),
                    route(0, SingleLink4),
                    route(1, SingleLink5),
                    route(1, SingleLink6),
                    route(1, SingleLink7),
                    route(1, SingleLink8),
                ],
            ),
            (
                DuplexProfile::FourSubDevicesHalfDuplex,
                &[
                    route(0, SingleLink1),
                    route(0, SingleLink2),
                    route(1, SingleLink3),
                    route(1, SingleLink4),
                    route(2, SingleLink5),
                    route(2, SingleLink6),
                    route(3, SingleLink7),
                    route(3, SingleLink8),
                ],
            ),
        ],
    },
    ModelTable {
        model_name: "DeckLink SDI 4K",
        ports: 2,
        profiles: &[(
            DuplexProfile::OneSubDeviceFullDuplex,
            &[
                Route {
                    sub_unit: 0,
                    channel: SingleLink1,
                    directions: &[Direction::Input],
                },
                Route {
                    sub_unit: 0,
                    channel: SingleLink2,
                    directions: &[Direction::Output],
                },
            ],
        )],
    },
];

/// Routing table for a model, if known.
pub fn model_table(model_name: &str) -> Option<&'static ModelTable> {
    TABLES.iter().find(|t| t.model_name == model_name)
}

/// Every model with a routing table.
pub fn known_models() -> impl Iterator<Item = &'static str> {
    TABLES.iter().map(|t| t.model_name)
}

/// Number of physical connectors of a model.
pub fn port_count(model_name: &str) -> Option<u32> {
    model_table(model_name).map(|t| t.ports)
}

/// Duplex profiles a model can be switched to.
pub fn profiles(model_name: &str) -> Vec<DuplexProfile> {
    model_table(model_name)
        .map(|t| t.profiles.iter().map(|(p, _)| *p).collect())
        .unwrap_or_default()
}

/// Routes of a model under one profile.
pub fn routes(model_name: &str, profile: DuplexProfile) -> &'static [Route] {
    model_table(model_name)
        .and_then(|t| t.profiles.iter().find(|(p, _)| *p == profile))
        .map(|(_, routes)| *routes)
        .unwrap_or(&[])
}

/// `Direction x Channel -> SubUnit` for one device under its active profile.
#[derive(Default)]
pub struct ChannelMap {
    routes: BTreeMap<Direction, BTreeMap<Channel, Arc<SubUnit>>>,
    half_duplex: bool,
}

impl ChannelMap {
    /// Resolves the static routes of `model_name` under `profile` against the
    /// device's sub-units. Routes naming a sub-unit that was not enumerated
    /// are skipped.
    pub fn build(model_name: &str, profile: DuplexProfile, sub_units: &[Arc<SubUnit>]) -> Self {
        let mut map = ChannelMap {
            routes: BTreeMap::new(),
            half_duplex: profile.is_half_duplex(),
        };
        if model_table(model_name).is_none() {
            log::error!("No channel map found for device: {}", model_name);
            return map;
        }

        for route in routes(model_name, profile) {
            let Some(sub_unit) = sub_units.iter().find(|s| s.index() == route.sub_unit) else {
                log::warn!(
                    "{}: sub-unit {} for {} not present under {}",
                    model_name,
                    route.sub_unit,
                    route.channel,
                    profile
                );
                continue;
            };
            for &direction in route.directions {
                map.routes
                    .entry(direction)
                    .or_default()
                    .insert(route.channel, Arc::clone(sub_unit));
            }
        }
        map
    }

    pub fn resolve(&self, direction: Direction, channel: Channel) -> Option<&Arc<SubUnit>> {
        self.routes.get(&direction)?.get(&channel)
    }

    /// Channels with a route in `direction`, in port order.
    pub fn channels(&self, direction: Direction) -> Vec<Channel> {
        self.routes
            .get(&direction)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Half-duplex sub-units serve one direction at a time.
    pub fn is_half_duplex(&self) -> bool {
        self.half_duplex
    }

    pub fn is_empty(&self) -> bool {
        self.routes.values().all(|m| m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_consistent() {
        for table in TABLES {
            for (profile, routes) in table.profiles {
                for route in *routes {
                    assert!(
                        route.sub_unit < profile.sub_unit_count(),
                        "{} {}: sub-unit {} out of range",
                        table.model_name,
                        profile,
                        route.sub_unit
                    );
                    assert!(route.channel.port() <= table.ports);
                }
            }
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(port_count("DeckLink Quad 2"), Some(8));
        assert_eq!(port_count("Intensity Pro"), None);
        assert!(known_models().any(|m| m == "DeckLink 8K Pro"));
        assert_eq!(profiles("DeckLink Duo 2").len(), 2);
        assert!(routes("DeckLink Duo 2", DuplexProfile::OneSubDeviceHalfDuplex).is_empty());
    }

    #[test]
    fn test_shared_sub_unit() {
        let shared: Vec<_> = routes("DeckLink 8K Pro", DuplexProfile::TwoSubDevicesFullDuplex)
            .iter()
            .filter(|r| r.sub_unit == 0)
            .map(|r| r.channel)
            .collect();
        assert_eq!(shared, vec![SingleLink1, SingleLink2]);
    }

    #[test]
    fn test_empty_map_for_unknown_model() {
        let map = ChannelMap::build("Unknown", DuplexProfile::OneSubDeviceFullDuplex, &[]);
        assert!(map.is_empty());
        assert!(map.resolve(Direction::Output, SingleLink1).is_none());
    }
}
