// src/model.rs
//! Reference SIR contact model
//!
//! A deliberately small agent-based epidemic used by the binary and the
//! integration tests. Each tick every infected agent meets a fixed number of
//! random agents and may infect the susceptible ones; infected agents
//! recover with a fixed probability.

use crate::export::record::{ColumnType, Field, Record, Value};
use crate::runtime::collection::parallel_map;
use crate::runtime::simulation::{Selector, Stage, Updater};
use crate::utils::config::SimulationConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Disease state of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Susceptible,
    Infected,
    Recovered,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Susceptible => "susceptible",
            Health::Infected => "infected",
            Health::Recovered => "recovered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    pub id: u32,
    pub health: Health,
    pub infected_at: Option<u64>,
}

/// Population plus the tick counter
#[derive(Debug, Clone)]
pub struct Population {
    pub run: u32,
    pub tick: u64,
    pub agents: Vec<Agent>,
    pub new_infections: u64,
}

impl Population {
    /// Seed `initial_infected` agents, chosen by `rng`
    pub fn seeded(run: u32, config: &SimulationConfig, rng: &mut StdRng) -> Self {
        let mut agents: Vec<Agent> = (0..config.population as u32)
            .map(|id| Agent {
                id,
                health: Health::Susceptible,
                infected_at: None,
            })
            .collect();

        let mut seeded = 0;
        while seeded < config.initial_infected {
            let index = rng.gen_range(0..agents.len());
            if agents[index].health == Health::Susceptible {
                agents[index].health = Health::Infected;
                agents[index].infected_at = Some(0);
                seeded += 1;
            }
        }

        Self {
            run,
            tick: 0,
            agents,
            new_infections: seeded as u64,
        }
    }

    pub fn count(&self, health: Health) -> usize {
        self.agents.iter().filter(|a| a.health == health).count()
    }
}

/// Advances a [`Population`] one tick
pub struct ContactUpdater {
    rng: StdRng,
    contacts_per_tick: usize,
    transmission_probability: f64,
    recovery_probability: f64,
}

impl ContactUpdater {
    pub fn new(config: &SimulationConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            contacts_per_tick: config.contacts_per_tick,
            transmission_probability: config.transmission_probability,
            recovery_probability: config.recovery_probability,
        }
    }
}

impl Updater<Population> for ContactUpdater {
    fn advance(&mut self, model: &mut Population) -> anyhow::Result<()> {
        let size = model.agents.len();
        if size == 0 {
            model.tick += 1;
            return Ok(());
        }

        let infectious: Vec<usize> = model
            .agents
            .iter()
            .enumerate()
            .filter(|(_, a)| a.health == Health::Infected)
            .map(|(i, _)| i)
            .collect();

        // decide on last tick's state, then apply
        let mut exposed = Vec::new();
        for _ in &infectious {
            for _ in 0..self.contacts_per_tick {
                let contact = self.rng.gen_range(0..size);
                if model.agents[contact].health == Health::Susceptible
                    && self.rng.gen_bool(self.transmission_probability)
                {
                    exposed.push(contact);
                }
            }
        }
        let recovering: Vec<usize> = infectious
            .into_iter()
            .filter(|_| self.rng.gen_bool(self.recovery_probability))
            .collect();

        model.tick += 1;
        for index in recovering {
            model.agents[index].health = Health::Recovered;
        }
        let mut new_infections = 0;
        for index in exposed {
            let agent = &mut model.agents[index];
            if agent.health == Health::Susceptible {
                agent.health = Health::Infected;
                agent.infected_at = Some(model.tick);
                new_infections += 1;
            }
        }
        model.new_infections = new_infections;
        Ok(())
    }
}

/// Compartment counts at one point of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRecord {
    pub run: u32,
    pub tick: u64,
    pub stage: Stage,
    pub susceptible: u64,
    pub infected: u64,
    pub recovered: u64,
    pub new_infections: u64,
}

impl Record for SummaryRecord {
    const SCHEMA: &'static [Field<Self>] = &[
        Field { name: "run", column: ColumnType::Integer, read: |r| Value::Int(r.run as i64) },
        Field { name: "tick", column: ColumnType::Integer, read: |r| Value::Int(r.tick as i64) },
        Field { name: "stage", column: ColumnType::Text, read: |r| Value::Text(r.stage.to_string()) },
        Field { name: "susceptible", column: ColumnType::Integer, read: |r| Value::Int(r.susceptible as i64) },
        Field { name: "infected", column: ColumnType::Integer, read: |r| Value::Int(r.infected as i64) },
        Field { name: "recovered", column: ColumnType::Integer, read: |r| Value::Int(r.recovered as i64) },
        Field { name: "new_infections", column: ColumnType::Integer, read: |r| Value::Int(r.new_infections as i64) },
    ];
}

/// State of one agent at one point of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub run: u32,
    pub tick: u64,
    pub agent: u32,
    pub health: Health,
    pub infected_at: Option<u64>,
}

impl Record for AgentRecord {
    const SCHEMA: &'static [Field<Self>] = &[
        Field { name: "run", column: ColumnType::Integer, read: |r| Value::Int(r.run as i64) },
        Field { name: "tick", column: ColumnType::Integer, read: |r| Value::Int(r.tick as i64) },
        Field { name: "agent", column: ColumnType::Integer, read: |r| Value::Int(r.agent as i64) },
        Field { name: "health", column: ColumnType::Text, read: |r| Value::Text(r.health.as_str().to_string()) },
        Field {
            name: "infected_at",
            column: ColumnType::Integer,
            read: |r| r.infected_at.map_or(Value::Null, |t| Value::Int(t as i64)),
        },
    ];
}

/// One summary row for every stage
pub struct SummarySelector;

impl Selector<Population> for SummarySelector {
    type Record = SummaryRecord;

    fn records_for(&self, model: &Population, stage: Stage) -> Vec<SummaryRecord> {
        vec![SummaryRecord {
            run: model.run,
            tick: model.tick,
            stage,
            susceptible: model.count(Health::Susceptible) as u64,
            infected: model.count(Health::Infected) as u64,
            recovered: model.count(Health::Recovered) as u64,
            new_infections: model.new_infections,
        }]
    }
}

/// Every agent, at baseline and finish only
pub struct AgentSelector;

impl Selector<Population> for AgentSelector {
    type Record = AgentRecord;

    fn records_for(&self, model: &Population, stage: Stage) -> Vec<AgentRecord> {
        self.records_for_bulk(model, stage, usize::MAX)
    }

    /// Large populations are snapshotted on scoped threads
    fn records_for_bulk(&self, model: &Population, stage: Stage, threshold: usize) -> Vec<AgentRecord> {
        if !matches!(stage, Stage::Baseline | Stage::Finish) {
            return Vec::new();
        }
        let record = |agent: &Agent| AgentRecord {
            run: model.run,
            tick: model.tick,
            agent: agent.id,
            health: agent.health,
            infected_at: agent.infected_at,
        };
        if model.agents.len() >= threshold {
            parallel_map(&model.agents, record)
        } else {
            model.agents.iter().map(record).collect()
        }
    }
}
